use num_traits::Zero;

#[derive(Clone, Copy, Default, PartialEq, PartialOrd, Debug)]
#[repr(C)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

impl<T: Zero> Complex<T> {
    pub fn zero() -> Self {
        Self {
            re: T::zero(),
            im: T::zero(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.re.is_zero() && self.im.is_zero()
    }
}

/// One baseband IQ sample, as carried by records and streams
pub type Sample = Complex<f32>;

/// Flatten samples into interleaved `[re, im, re, im, ...]` floats
pub fn interleave(samples: &[Sample], out: &mut Vec<f32>) {
    out.clear();
    out.reserve(samples.len() * 2);
    for s in samples {
        out.push(s.re);
        out.push(s.im);
    }
}

/// Inverse of [`interleave`]. A trailing unpaired float is ignored.
pub fn deinterleave(floats: &[f32], out: &mut Vec<Sample>) {
    out.clear();
    out.extend(floats.chunks_exact(2).map(|p| Sample::new(p[0], p[1])));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave() {
        let samples = [Sample::new(1.0, -1.0), Sample::new(0.5, 2.0)];
        let mut floats = vec![];
        interleave(&samples, &mut floats);
        assert_eq!(floats, vec![1.0, -1.0, 0.5, 2.0]);
        let mut back = vec![];
        deinterleave(&floats[..3], &mut back);
        assert_eq!(back, vec![samples[0]]);
    }

    #[test]
    fn test_zero() {
        assert!(Sample::zero().is_zero());
        assert!(!Sample::new(0.0, 1.0).is_zero());
    }
}
