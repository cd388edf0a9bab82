//! N-way audio mixer: jitter handling, crowd scaling, side-chain duck,
//! master compression (spec §3.7, §4.6). Runs once per 20 ms tick.

use crate::audio::compressor::{Compressor, Envelope};
use crate::client::{ClientInfo, SharedClient};
use crate::packet_queue::{PayloadHandle, QueuedPacket};
use crate::protocol::crc::crc32;
use crate::protocol::packet::PacketType;
use crate::protocol::PacketHeader;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

pub const SAMPLE_RATE: f32 = 48_000.0;
pub const BATCH_SAMPLES: usize = 960; // 20 ms at 48 kHz
const SILENT_TICKS_BEFORE_GONE: u32 = 3;

struct SourceState {
    client: Weak<ClientInfo>,
    duck_envelope: Envelope,
    consecutive_silent_ticks: u32,
}

pub struct Mixer {
    sources: Vec<SourceState>,
    compressor: Compressor,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            compressor: Compressor::default_master(SAMPLE_RATE),
        }
    }

    fn source_index(&self, id: u32) -> Option<usize> {
        self.sources.iter().position(|s| s.client.upgrade().map(|c| c.id) == Some(id))
    }

    /// Ensure every currently audio-active client has mixer-side state,
    /// and drop state for clients that have disappeared.
    fn sync_sources(&mut self, clients: &[SharedClient]) {
        self.sources.retain(|s| s.client.strong_count() > 0);
        for client in clients {
            if client.sending_audio.load(Ordering::Relaxed) && self.source_index(client.id).is_none() {
                self.sources.push(SourceState {
                    client: Arc::downgrade(client),
                    duck_envelope: Envelope::new(0.005, 0.12, SAMPLE_RATE),
                    consecutive_silent_ticks: 0,
                });
            }
        }
    }

    /// Run one 20 ms tick: drain each source, mix, duck, compress, and
    /// enqueue an `AUDIO_BATCH` to every active client.
    pub fn tick(&mut self, clients: &[SharedClient]) {
        self.sync_sources(clients);

        struct Drained {
            client_id: u32,
            samples: [f32; BATCH_SAMPLES],
            rms: f32,
            active: bool,
        }

        let mut drained = Vec::with_capacity(self.sources.len());
        for source in &mut self.sources {
            let Some(client) = source.client.upgrade() else { continue };
            let mut samples = [0.0f32; BATCH_SAMPLES];
            let n = client.inbound_audio_consumer.lock().read(&mut samples);
            if n == 0 {
                source.consecutive_silent_ticks += 1;
            } else {
                source.consecutive_silent_ticks = 0;
            }
            let active = source.consecutive_silent_ticks < SILENT_TICKS_BEFORE_GONE;
            let rms = rms_of(&samples[..n]);
            drained.push(Drained { client_id: client.id, samples, rms, active });
        }

        let active_sources: Vec<&Drained> = drained.iter().filter(|d| d.active).collect();
        let n_active = active_sources.len();
        if n_active == 0 {
            return;
        }
        let crowd_gain = 1.0 / (n_active as f32).sqrt();

        // Side-chain duck: each source's own contribution is attenuated by
        // the combined RMS of all *other* sources, so a louder speaker
        // pushes quieter background sources down rather than being buried
        // by them (spec §4.6 step 4). Tracked per source via its own
        // one-pole envelope so the attenuation attacks fast and releases
        // slowly.
        const DUCK_STRENGTH: f32 = 6.0;
        let mut attenuation = vec![1.0f32; self.sources.len()];
        for (idx, source) in self.sources.iter_mut().enumerate() {
            if source.client.upgrade().is_none() {
                continue;
            }
            let Some(d) = drained.get(idx) else { continue };
            if !d.active {
                continue;
            }
            let others_rms: f32 = active_sources
                .iter()
                .filter(|o| o.client_id != d.client_id)
                .map(|o| o.rms)
                .sum();
            let envelope_value = source.duck_envelope.process(others_rms);
            attenuation[idx] = 1.0 / (1.0 + envelope_value * DUCK_STRENGTH);
        }

        // Full mix (every active source), used as the default send-to-all output.
        let mut full_mix = [0.0f32; BATCH_SAMPLES];
        for (idx, d) in drained.iter().enumerate() {
            if !d.active {
                continue;
            }
            let gain = crowd_gain * attenuation[idx];
            for (acc, s) in full_mix.iter_mut().zip(d.samples.iter()) {
                *acc += s * gain;
            }
        }

        let mut mixed = full_mix;
        self.compressor.process(&mut mixed);

        for client in clients {
            if !client.sending_audio.load(Ordering::Relaxed) && !client.has_cap(crate::client::info::CAP_AUDIO) {
                continue;
            }
            let mut bytes = Vec::with_capacity(BATCH_SAMPLES * 4);
            for s in mixed.iter() {
                bytes.extend_from_slice(&s.to_le_bytes());
            }
            let header = PacketHeader::new(PacketType::AudioBatch as u16, bytes.len() as u32, crc32(&bytes), 0);
            client.outbound_audio.enqueue(QueuedPacket { header, payload: PayloadHandle::Owned(bytes) });
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

fn rms_of(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms_of(&[0.0; 960]), 0.0);
    }

    #[test]
    fn rms_of_full_scale_square_is_one() {
        assert!((rms_of(&[1.0; 960]) - 1.0).abs() < 1e-6);
    }
}
