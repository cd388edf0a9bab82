//! Side-chain ducking envelopes and the master soft-knee compressor
//! (spec §4.6 steps 4-5).

/// One-pole smoothed envelope follower; `attack`/`release` are time
/// constants in seconds, converted to per-sample coefficients at the
/// configured sample rate.
pub struct Envelope {
    attack_coeff: f32,
    release_coeff: f32,
    value: f32,
}

impl Envelope {
    pub fn new(attack_secs: f32, release_secs: f32, sample_rate: f32) -> Self {
        Self {
            attack_coeff: coeff(attack_secs, sample_rate),
            release_coeff: coeff(release_secs, sample_rate),
            value: 0.0,
        }
    }

    pub fn process(&mut self, input_abs: f32) -> f32 {
        let coeff = if input_abs > self.value { self.attack_coeff } else { self.release_coeff };
        self.value += coeff * (input_abs - self.value);
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

fn coeff(time_secs: f32, sample_rate: f32) -> f32 {
    if time_secs <= 0.0 {
        return 1.0;
    }
    1.0 - (-1.0 / (time_secs * sample_rate)).exp()
}

/// Soft-knee compressor (spec §4.6.5): threshold/ratio/knee in dB,
/// attack/release as one-pole envelopes on the peak-detected input.
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    knee_db: f32,
    makeup_gain: f32,
    envelope: Envelope,
}

impl Compressor {
    pub fn new(threshold_db: f32, ratio: f32, attack_secs: f32, release_secs: f32, knee_db: f32, makeup_gain: f32, sample_rate: f32) -> Self {
        Self {
            threshold_db,
            ratio,
            knee_db,
            makeup_gain,
            envelope: Envelope::new(attack_secs, release_secs, sample_rate),
        }
    }

    /// Default per spec §4.6.5: -18 dBFS threshold, 4:1, 3ms/80ms, 6dB knee.
    pub fn default_master(sample_rate: f32) -> Self {
        Self::new(-18.0, 4.0, 0.003, 0.08, 6.0, db_to_linear(3.0), sample_rate)
    }

    /// Apply the compressor sample-by-sample, in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let peak = s.abs().max(1e-9);
            let detected_db = linear_to_db(peak);
            let envelope_db = linear_to_db(self.envelope.process(peak));
            let gain_db = self.static_gain_db(envelope_db.max(detected_db.min(envelope_db + 1.0)));
            let gain = db_to_linear(gain_db) * self.makeup_gain;
            *s = (*s * gain).clamp(-1.0, 1.0);
        }
    }

    /// Soft-knee transfer function: below `threshold - knee/2` unity
    /// gain, above `threshold + knee/2` full ratio, smoothly
    /// interpolated (quadratic) in between.
    fn static_gain_db(&self, input_db: f32) -> f32 {
        let knee_low = self.threshold_db - self.knee_db / 2.0;
        let knee_high = self.threshold_db + self.knee_db / 2.0;
        let over = if input_db <= knee_low {
            0.0
        } else if input_db >= knee_high {
            input_db - self.threshold_db
        } else {
            let x = input_db - knee_low;
            let knee_span = self.knee_db.max(1e-6);
            (x * x) / (2.0 * knee_span)
        };
        -(over - over / self.ratio)
    }
}

pub fn linear_to_db(x: f32) -> f32 {
    20.0 * x.max(1e-9).log10()
}

pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_signal_passes_near_unity() {
        let mut comp = Compressor::default_master(48_000.0);
        let mut samples = vec![0.01f32; 2000];
        comp.process(&mut samples);
        assert!(samples.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn loud_signal_never_exceeds_unity() {
        let mut comp = Compressor::default_master(48_000.0);
        let mut samples = vec![0.99f32; 4000];
        comp.process(&mut samples);
        assert!(samples.iter().all(|&s| s <= 1.0 && s >= -1.0));
    }

    #[test]
    fn envelope_attacks_faster_than_it_releases() {
        let mut env = Envelope::new(0.003, 0.08, 48_000.0);
        env.process(1.0);
        let after_attack = env.value();
        let after_one_release_sample = {
            env.process(0.0);
            env.value()
        };
        assert!(after_attack > 0.0);
        assert!(after_one_release_sample < after_attack);
    }
}
