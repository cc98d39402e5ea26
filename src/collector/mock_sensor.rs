use chrono::{Local, Timelike};
use rand::Rng;

use crate::db::models::SensorReading;

const BASE_TEMPERATURE: f64 = 23.0;
const BASE_HUMIDITY: f64 = 55.0;

const TEMPERATURE_RANGE: (f64, f64) = (5.0, 40.0);
const HUMIDITY_RANGE: (f64, f64) = (30.0, 80.0);
const ILLUMINANCE_RANGE: (f64, f64) = (10.0, 1000.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayBand {
    /// 06:00 through 18:59
    Day,
    /// 19:00 through 22:59
    Evening,
    Night,
}

impl DayBand {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=18 => DayBand::Day,
            19..=22 => DayBand::Evening,
            _ => DayBand::Night,
        }
    }

    fn temperature_factor(self) -> f64 {
        match self {
            DayBand::Day => 1.2,
            DayBand::Evening => 1.0,
            DayBand::Night => 0.7,
        }
    }

    fn base_illuminance(self) -> f64 {
        match self {
            DayBand::Day => 400.0,
            DayBand::Evening => 150.0,
            DayBand::Night => 50.0,
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn clamp_round((min, max): (f64, f64), value: f64) -> f64 {
    round1(value.clamp(min, max))
}

/// Synthesizes a plausible reading for the given local hour.
pub fn reading_for_hour<R: Rng + ?Sized>(hour: u32, rng: &mut R) -> SensorReading {
    let band = DayBand::from_hour(hour);

    let temperature =
        BASE_TEMPERATURE * band.temperature_factor() + rng.gen_range(-3.0..=3.0);
    let humidity = BASE_HUMIDITY + rng.gen_range(-15.0..=15.0);
    let illuminance = band.base_illuminance() + rng.gen_range(-50.0..=100.0);

    SensorReading::new(
        clamp_round(TEMPERATURE_RANGE, temperature),
        clamp_round(HUMIDITY_RANGE, humidity),
        clamp_round(ILLUMINANCE_RANGE, illuminance),
    )
}

/// Stands in for real hardware while the demo camera drives collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockSensorGenerator;

impl MockSensorGenerator {
    pub fn generate(&self) -> SensorReading {
        reading_for_hour(Local::now().hour(), &mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn samples(hour: u32) -> Vec<SensorReading> {
        let mut rng = StdRng::seed_from_u64(u64::from(hour) + 7);
        (0..500).map(|_| reading_for_hour(hour, &mut rng)).collect()
    }

    fn values(readings: &[SensorReading], pick: fn(&SensorReading) -> Option<f64>) -> Vec<f64> {
        readings.iter().map(|r| pick(r).unwrap()).collect()
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(DayBand::from_hour(5), DayBand::Night);
        assert_eq!(DayBand::from_hour(6), DayBand::Day);
        assert_eq!(DayBand::from_hour(18), DayBand::Day);
        assert_eq!(DayBand::from_hour(19), DayBand::Evening);
        assert_eq!(DayBand::from_hour(22), DayBand::Evening);
        assert_eq!(DayBand::from_hour(23), DayBand::Night);
        assert_eq!(DayBand::from_hour(0), DayBand::Night);
    }

    #[test]
    fn daytime_is_warm_and_bright() {
        let readings = samples(12);
        for t in values(&readings, |r| r.temperature) {
            assert!((24.6..=30.6).contains(&t), "temperature {t}");
        }
        for lux in values(&readings, |r| r.illuminance) {
            assert!((350.0..=500.0).contains(&lux), "illuminance {lux}");
        }
    }

    #[test]
    fn night_is_cool_and_dark() {
        let readings = samples(3);
        for t in values(&readings, |r| r.temperature) {
            assert!((13.1..=19.1).contains(&t), "temperature {t}");
        }
        for lux in values(&readings, |r| r.illuminance) {
            assert!((10.0..=150.0).contains(&lux), "illuminance {lux}");
        }
    }

    #[test]
    fn evening_sits_between() {
        let readings = samples(20);
        for t in values(&readings, |r| r.temperature) {
            assert!((20.0..=26.0).contains(&t), "temperature {t}");
        }
        for lux in values(&readings, |r| r.illuminance) {
            assert!((100.0..=250.0).contains(&lux), "illuminance {lux}");
        }
    }

    #[test]
    fn humidity_stays_in_range_and_values_are_rounded() {
        for hour in [0, 8, 21] {
            for reading in samples(hour) {
                let h = reading.humidity.unwrap();
                assert!((30.0..=80.0).contains(&h));
                for v in [reading.temperature, reading.humidity, reading.illuminance] {
                    let v = v.unwrap();
                    assert!((v * 10.0 - (v * 10.0).round()).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn generate_always_fills_every_field() {
        let reading = MockSensorGenerator.generate();
        assert!(reading.temperature.is_some());
        assert!(reading.humidity.is_some());
        assert!(reading.illuminance.is_some());
    }
}
