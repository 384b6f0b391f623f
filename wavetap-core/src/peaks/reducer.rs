/// Reduces interleaved PCM frames into one min/max pair per audio channel
/// per window of `samples_per_window` frames. Accumulation only; the read
/// loop owns all I/O.
#[derive(Debug)]
pub struct PeakReducer {
    channels: usize,
    samples_per_window: usize,
    extrema: Vec<Option<(i16, i16)>>,
    frames_in_window: usize,
    windows_emitted: usize,
}

impl PeakReducer {
    pub fn new(channels: usize, samples_per_window: usize) -> Self {
        debug_assert!(channels > 0);
        debug_assert!(samples_per_window > 0);
        Self {
            channels,
            samples_per_window,
            extrema: vec![None; channels],
            frames_in_window: 0,
            windows_emitted: 0,
        }
    }

    /// Records one sample value. Frames are counted in lockstep: the
    /// window advances when the last channel of a frame is observed.
    pub fn observe(&mut self, channel: usize, value: i16) {
        let slot = &mut self.extrema[channel];
        *slot = Some(match *slot {
            Some((min, max)) => (min.min(value), max.max(value)),
            None => (value, value),
        });
        if channel == self.channels - 1 {
            self.frames_in_window += 1;
        }
    }

    /// Records a whole frame, one value per channel.
    pub fn observe_frame(&mut self, frame: &[i16]) {
        debug_assert_eq!(frame.len(), self.channels);
        for (channel, value) in frame.iter().enumerate() {
            self.observe(channel, *value);
        }
    }

    pub fn window_ready(&self) -> bool {
        self.frames_in_window >= self.samples_per_window
    }

    /// Emits the current window as interleaved pairs (channel 0 min,
    /// channel 0 max, channel 1 min, ...) and resets for the next window.
    /// A channel that saw no samples emits 0/0 rather than sentinel
    /// extrema.
    pub fn emit(&mut self) -> Vec<(i16, i16)> {
        let pairs = self
            .extrema
            .iter()
            .map(|slot| slot.unwrap_or((0, 0)))
            .collect();
        self.extrema.fill(None);
        self.frames_in_window = 0;
        self.windows_emitted += 1;
        pairs
    }

    /// Emits a trailing partial window, if any samples arrived since the
    /// last emit. Dropping the tail would make the pair count depend on
    /// whether the stream length divides evenly by the window size.
    pub fn flush_partial(&mut self) -> Option<Vec<(i16, i16)>> {
        if self.frames_in_window == 0 {
            return None;
        }
        Some(self.emit())
    }

    pub fn windows_emitted(&self) -> usize {
        self.windows_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_window_tracks_min_and_max() {
        let mut reducer = PeakReducer::new(1, 4);
        for value in [100i16, -200, 300, -400] {
            reducer.observe(0, value);
        }
        assert!(reducer.window_ready());
        assert_eq!(reducer.emit(), vec![(-400, 300)]);
    }

    #[test]
    fn stereo_channels_reduce_independently() {
        let mut reducer = PeakReducer::new(2, 2);
        reducer.observe_frame(&[100, 200]);
        reducer.observe_frame(&[300, 400]);
        assert!(reducer.window_ready());
        assert_eq!(reducer.emit(), vec![(100, 300), (200, 400)]);
    }

    #[test]
    fn window_counts_frames_not_samples() {
        let mut reducer = PeakReducer::new(2, 2);
        reducer.observe_frame(&[1, 2]);
        assert!(!reducer.window_ready());
        reducer.observe(0, 3);
        // Frame is not complete until the last channel arrives.
        assert!(!reducer.window_ready());
        reducer.observe(1, 4);
        assert!(reducer.window_ready());
    }

    #[test]
    fn emits_ceil_of_frames_over_window() {
        let mut reducer = PeakReducer::new(1, 4);
        let mut emitted = 0;
        for value in 0..10i16 {
            reducer.observe(0, value);
            if reducer.window_ready() {
                reducer.emit();
                emitted += 1;
            }
        }
        if reducer.flush_partial().is_some() {
            emitted += 1;
        }
        // 10 frames, window 4: two full windows plus the flushed tail.
        assert_eq!(emitted, 3);
        assert_eq!(reducer.windows_emitted(), 3);
    }

    #[test]
    fn single_leftover_frame_is_flushed() {
        let mut reducer = PeakReducer::new(1, 512);
        reducer.observe(0, 7);
        assert!(!reducer.window_ready());
        assert_eq!(reducer.flush_partial(), Some(vec![(7, 7)]));
        assert_eq!(reducer.flush_partial(), None);
    }

    #[test]
    fn empty_window_defaults_to_zero_pair() {
        let mut reducer = PeakReducer::new(2, 4);
        assert_eq!(reducer.emit(), vec![(0, 0), (0, 0)]);
    }
}
