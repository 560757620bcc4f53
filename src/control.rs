//! Radio control surface for code that expects to talk to real hardware
//!
//! Nothing in the record path uses this. It exists so a runtime that insists
//! on tuning, setting gains and reading the clock has something to call.
//! [`NullRadio`] accepts every setter and answers only the getters it can
//! answer honestly.

use crate::{
    error::{Error, Result},
    time::Timestamp,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneResult {
    pub target_rf_freq: f64,
    pub actual_rf_freq: f64,
    pub target_dsp_freq: f64,
    pub actual_dsp_freq: f64,
}

pub trait RadioControl {
    fn time_now(&self) -> Result<Timestamp>;
    fn set_time_now(&mut self, time: Timestamp) -> Result<()>;

    fn sample_rate(&self) -> Result<f64>;
    fn set_sample_rate(&mut self, rate: f64) -> Result<()>;

    fn center_freq(&self, chan: usize) -> Result<f64>;
    fn set_center_freq(&mut self, freq: f64, chan: usize) -> Result<TuneResult>;

    fn gain(&self, chan: usize) -> Result<f64>;
    fn set_gain(&mut self, gain: f64, chan: usize) -> Result<()>;

    fn antenna(&self, chan: usize) -> Result<String>;
    fn set_antenna(&mut self, antenna: &str, chan: usize) -> Result<()>;

    fn set_subdev_spec(&mut self, spec: &str) -> Result<()>;
    fn sensor_names(&self) -> Vec<String>;
}

/// Accepts everything, remembers nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRadio;

impl RadioControl for NullRadio {
    fn time_now(&self) -> Result<Timestamp> {
        Ok(Timestamp::now())
    }

    // TODO: keep an offset from wall time so set_time_now shows up in time_now
    fn set_time_now(&mut self, _time: Timestamp) -> Result<()> {
        Ok(())
    }

    fn sample_rate(&self) -> Result<f64> {
        Err(Error::Unsupported("sample_rate"))
    }

    fn set_sample_rate(&mut self, _rate: f64) -> Result<()> {
        Ok(())
    }

    fn center_freq(&self, _chan: usize) -> Result<f64> {
        Err(Error::Unsupported("center_freq"))
    }

    fn set_center_freq(&mut self, freq: f64, _chan: usize) -> Result<TuneResult> {
        Ok(TuneResult {
            target_rf_freq: freq,
            actual_rf_freq: freq,
            target_dsp_freq: freq,
            actual_dsp_freq: freq,
        })
    }

    fn gain(&self, _chan: usize) -> Result<f64> {
        Err(Error::Unsupported("gain"))
    }

    fn set_gain(&mut self, _gain: f64, _chan: usize) -> Result<()> {
        Ok(())
    }

    fn antenna(&self, _chan: usize) -> Result<String> {
        Err(Error::Unsupported("antenna"))
    }

    fn set_antenna(&mut self, _antenna: &str, _chan: usize) -> Result<()> {
        Ok(())
    }

    fn set_subdev_spec(&mut self, _spec: &str) -> Result<()> {
        Ok(())
    }

    fn sensor_names(&self) -> Vec<String> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_radio() {
        let mut radio = NullRadio;
        let tune = radio.set_center_freq(915e6, 0).unwrap();
        assert_eq!(tune.actual_rf_freq, 915e6);
        radio.set_gain(30.0, 0).unwrap();
        assert!(matches!(radio.gain(0), Err(Error::Unsupported(_))));
        assert!(radio.sensor_names().is_empty());
        assert!(radio.time_now().unwrap().secs() > 0);
    }
}
