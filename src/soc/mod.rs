//! State-of-Charge Estimator (§4.F).
//!
//! Three update paths, selected per string:
//!  - at rest: recalibrate directly from the open-circuit-voltage lookup
//!    table, since terminal voltage converges to OCV once current has been
//!    near zero for long enough (the Current-Flow Classifier's `at_rest`
//!    state, §4.H.8, is the trigger).
//!  - a coulomb-counter is present: SOC tracks the counter's running charge
//!    total against a scaling offset fixed at the last recalibration.
//!  - no coulomb-counter: SOC is integrated directly from instantaneous
//!    current over the elapsed time since the last sample.
//!
//! The discharge-current polarity convention is a genuine ambiguity in the
//! source material (see design notes): [`crate::config::SocConfig::positive_discharge_current`]
//! makes the choice an explicit, documented parameter rather than a guess.

pub mod ocv;

use crate::config::{NR_STRINGS, SocConfig};
use crate::measurement::MeasurementSnapshot;
use crate::nvm::records::SocRecord;
use crate::types::StringIndex;

fn clamp_soc(v: f32) -> f32 {
    v.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, Default)]
struct StringSocState {
    initialized: bool,
    coulomb_counter_present: bool,
    scaling_avg: f32,
    scaling_min: f32,
    scaling_max: f32,
    previous_timestamp_ms: u32,
}

pub struct SocEstimator {
    config: SocConfig,
    strings: [StringSocState; NR_STRINGS],
}

impl SocEstimator {
    pub fn new(config: SocConfig) -> Self {
        Self { config, strings: [StringSocState::default(); NR_STRINGS] }
    }

    fn polarity(&self, magnitude: f32) -> f32 {
        if self.config.positive_discharge_current { magnitude } else { -magnitude }
    }

    /// Seed a string's estimator state from its persisted record. Must be
    /// called once per string before [`Self::compute`] touches it.
    pub fn initialize(
        &mut self,
        s: StringIndex,
        coulomb_counter_present: bool,
        coulomb_count_as: f32,
        timestamp_ms: u32,
        persisted: &SocRecord,
        values: &mut SocRecord,
    ) {
        let st = &mut self.strings[s.get()];
        st.coulomb_counter_present = coulomb_counter_present;

        values.avg_perc[s.get()] = clamp_soc(persisted.avg_perc[s.get()]);
        values.min_perc[s.get()] = clamp_soc(persisted.min_perc[s.get()]);
        values.max_perc[s.get()] = clamp_soc(persisted.max_perc[s.get()]);

        if coulomb_counter_present {
            let magnitude = (coulomb_count_as.abs() / self.config.string_capacity_as) * 100.0;
            let offset = self.polarity(magnitude);
            st.scaling_avg = values.avg_perc[s.get()] + offset;
            st.scaling_min = values.min_perc[s.get()] + offset;
            st.scaling_max = values.max_perc[s.get()] + offset;
        } else {
            st.previous_timestamp_ms = timestamp_ms;
        }
        st.initialized = true;
    }

    /// Recalibrate or integrate every initialized string's SOC in place.
    pub fn compute(&mut self, at_rest: bool, measurements: &MeasurementSnapshot, values: &mut SocRecord) {
        for s in StringIndex::all() {
            if !self.strings[s.get()].initialized {
                continue;
            }
            if at_rest {
                self.recalibrate_via_ocv(s, measurements, values);
            } else {
                self.integrate(s, measurements, values);
            }
        }
    }

    fn recalibrate_via_ocv(&mut self, s: StringIndex, measurements: &MeasurementSnapshot, values: &mut SocRecord) {
        let sm = measurements.string(s);
        values.min_perc[s.get()] = clamp_soc(ocv::soc_from_voltage_mv(sm.min_cell_mv));
        values.max_perc[s.get()] = clamp_soc(ocv::soc_from_voltage_mv(sm.max_cell_mv));
        values.avg_perc[s.get()] = clamp_soc(ocv::soc_from_voltage_mv(sm.avg_cell_mv));

        let st = &mut self.strings[s.get()];
        if st.coulomb_counter_present {
            let magnitude = (sm.coulomb_count_as.abs() / self.config.string_capacity_as) * 100.0;
            let offset = self.polarity(magnitude);
            st.scaling_avg = values.avg_perc[s.get()] + offset;
            st.scaling_min = values.min_perc[s.get()] + offset;
            st.scaling_max = values.max_perc[s.get()] + offset;
        }
        st.previous_timestamp_ms = sm.timestamp_ms;
    }

    fn integrate(&mut self, s: StringIndex, measurements: &MeasurementSnapshot, values: &mut SocRecord) {
        let sm = measurements.string(s);
        let st = &mut self.strings[s.get()];
        if sm.timestamp_ms == st.previous_timestamp_ms {
            return; // sample has not advanced since the last tick
        }

        if st.coulomb_counter_present {
            let delta_perc = self.polarity((sm.coulomb_count_as.abs() / self.config.string_capacity_as) * 100.0);
            values.avg_perc[s.get()] = clamp_soc(st.scaling_avg - delta_perc);
            values.min_perc[s.get()] = clamp_soc(st.scaling_min - delta_perc);
            values.max_perc[s.get()] = clamp_soc(st.scaling_max - delta_perc);
        } else {
            let dt_s = crate::clock::elapsed_since(st.previous_timestamp_ms, sm.timestamp_ms) as f32 / 1000.0;
            let delta_perc =
                self.polarity((sm.string_current_ma as f32 * dt_s / self.config.string_capacity_ma_s) * 100.0);
            values.avg_perc[s.get()] = clamp_soc(values.avg_perc[s.get()] - delta_perc);
            values.min_perc[s.get()] = clamp_soc(values.min_perc[s.get()] - delta_perc);
            values.max_perc[s.get()] = clamp_soc(values.max_perc[s.get()] - delta_perc);
        }
        st.previous_timestamp_ms = sm.timestamp_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::StringMeasurement;

    fn snapshot_with_current(s: StringIndex, current_ma: i32, timestamp_ms: u32) -> MeasurementSnapshot {
        let mut snap = MeasurementSnapshot::default();
        snap.strings[s.get()] = StringMeasurement {
            string_current_ma: current_ma,
            timestamp_ms,
            ..StringMeasurement::default()
        };
        snap
    }

    #[test]
    fn plain_integration_discharges_soc_over_time() {
        let mut est = SocEstimator::new(SocConfig::default());
        let s = StringIndex::new(0).unwrap();
        let persisted = SocRecord { avg_perc: [80.0; NR_STRINGS], min_perc: [78.0; NR_STRINGS], max_perc: [82.0; NR_STRINGS] };
        let mut values = SocRecord::default();
        est.initialize(s, false, 0.0, 0, &persisted, &mut values);

        let snap = snapshot_with_current(s, 10_000, 3_600_000); // 10A for 1h
        est.compute(false, &snap, &mut values);
        assert!(values.avg_perc[s.get()] < 80.0);
    }

    #[test]
    fn at_rest_recalibrates_from_ocv_table() {
        let mut est = SocEstimator::new(SocConfig::default());
        let s = StringIndex::new(0).unwrap();
        let persisted = SocRecord::default();
        let mut values = SocRecord::default();
        est.initialize(s, false, 0.0, 0, &persisted, &mut values);

        let mut snap = MeasurementSnapshot::default();
        snap.strings[s.get()].avg_cell_mv = 3700;
        snap.strings[s.get()].min_cell_mv = 3700;
        snap.strings[s.get()].max_cell_mv = 3700;
        est.compute(true, &snap, &mut values);
        assert_eq!(values.avg_perc[s.get()], 50.0);
    }

    #[test]
    fn uninitialized_string_is_left_untouched() {
        let mut est = SocEstimator::new(SocConfig::default());
        let mut values = SocRecord { avg_perc: [42.0; NR_STRINGS], ..SocRecord::default() };
        let snap = MeasurementSnapshot::default();
        est.compute(false, &snap, &mut values);
        assert_eq!(values.avg_perc, [42.0; NR_STRINGS]);
    }
}
