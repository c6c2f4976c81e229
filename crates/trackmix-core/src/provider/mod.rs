//! Pull-model buffer providers and the per-track adapter chain
//!
//! The mixer pulls PCM from each track through a [`ProviderChain`]:
//!
//! ```text
//! input ─▶ [reformat] ─▶ [downmix | remix] ─▶ [post-downmix reformat] ─▶ [timestretch] ─▶ kernel
//! ```
//!
//! Only the stages a track needs exist. Stages do not own their upstream:
//! each call builds a borrowed [`Upstream`] view over the stages below it, so
//! adding or removing a stage never leaves a dangling link.
//!
//! ## Provider contract
//!
//! - `get_next_buffer(frames)` acquires up to `frames` frames and returns the
//!   count actually available (at least one), or `None` when the source is
//!   exhausted for now.
//! - `buffer()` exposes the acquired frames; it is only meaningful between a
//!   successful get and the matching release.
//! - `release_buffer(frames)` must follow every successful get exactly once.
//!   Releasing fewer frames than acquired leaves the remainder at the head of
//!   the next get.

mod copy;
mod downmix;
mod timestretch;

pub use copy::{CopyFrames, CopyStage, Reformat, ReformatStage};
pub use downmix::{Downmix, DownmixStage, Remix, RemixStage};
pub use timestretch::TimestretchStage;

/// Source of PCM frames for one track
pub trait BufferProvider {
    /// Acquire up to `frames` frames
    fn get_next_buffer(&mut self, frames: usize) -> Option<usize>;

    /// Bytes of the currently acquired frames
    fn buffer(&self) -> &[u8];

    /// Give back the first `frames` acquired frames
    fn release_buffer(&mut self, frames: usize);

    /// Drop any look-ahead state
    fn reset(&mut self) {}
}

/// Adapter between an upstream provider and the next consumer
///
/// A stage always serves frames out of its own buffer, so its output format
/// and channel count are independent of its upstream.
pub trait ProviderStage {
    fn get_next_buffer(&mut self, upstream: &mut dyn BufferProvider, frames: usize) -> Option<usize>;

    fn buffer(&self) -> &[u8];

    fn release_buffer(&mut self, upstream: &mut dyn BufferProvider, frames: usize);

    /// Return any held upstream frames not yet delivered downstream
    fn teardown(&mut self, upstream: &mut dyn BufferProvider);

    /// Forget buffered state without touching upstream
    fn reset(&mut self);
}

/// Position of a copying stage in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSlot {
    /// Track format to the format the downmix stage requires
    Reformat = 0,
    /// Track channel layout to mixer channel layout
    Downmix = 1,
    /// Downmix output format to the mixer-internal format
    PostDownmixReformat = 2,
}

const SLOT_COUNT: usize = 3;

/// Borrowed view of an input provider plus the stages stacked on it
///
/// Acts as the upstream of the stage just above the topmost stage it holds.
pub struct Upstream<'a> {
    stages: &'a mut [Option<Box<dyn ProviderStage>>],
    input: &'a mut Option<Box<dyn BufferProvider>>,
}

impl Upstream<'_> {
    fn top(&self) -> Option<usize> {
        self.stages.iter().rposition(Option::is_some)
    }
}

impl BufferProvider for Upstream<'_> {
    fn get_next_buffer(&mut self, frames: usize) -> Option<usize> {
        match self.top() {
            Some(i) => {
                let (below, rest) = self.stages.split_at_mut(i);
                let stage = rest[0].as_mut()?;
                let mut upstream = Upstream {
                    stages: below,
                    input: &mut *self.input,
                };
                stage.get_next_buffer(&mut upstream, frames)
            }
            None => self.input.as_mut()?.get_next_buffer(frames),
        }
    }

    fn buffer(&self) -> &[u8] {
        match self.top() {
            Some(i) => self.stages[i].as_ref().map(|s| s.buffer()).unwrap_or(&[]),
            None => self.input.as_ref().map(|p| p.buffer()).unwrap_or(&[]),
        }
    }

    fn release_buffer(&mut self, frames: usize) {
        match self.top() {
            Some(i) => {
                let (below, rest) = self.stages.split_at_mut(i);
                if let Some(stage) = rest[0].as_mut() {
                    let mut upstream = Upstream {
                        stages: below,
                        input: &mut *self.input,
                    };
                    stage.release_buffer(&mut upstream, frames);
                }
            }
            None => {
                if let Some(input) = self.input.as_mut() {
                    input.release_buffer(frames);
                }
            }
        }
    }
}

/// The input provider of a track plus its adapter stages
#[derive(Default)]
pub struct ProviderChain {
    input: Option<Box<dyn BufferProvider>>,
    stages: [Option<Box<dyn ProviderStage>>; SLOT_COUNT],
    timestretch: Option<TimestretchStage>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn has_stage(&self, slot: StageSlot) -> bool {
        self.stages[slot as usize].is_some()
    }

    pub fn has_timestretch(&self) -> bool {
        self.timestretch.is_some()
    }

    pub fn timestretch_mut(&mut self) -> Option<&mut TimestretchStage> {
        self.timestretch.as_mut()
    }

    /// Number of active stages, timestretch included
    pub fn stage_count(&self) -> usize {
        self.stages.iter().filter(|s| s.is_some()).count() + usize::from(self.timestretch.is_some())
    }

    /// Replace one copying stage
    ///
    /// Every stage first hands back what it holds, so frames buffered in the
    /// old layout resume from the input provider in the new one.
    pub fn set_stage(&mut self, slot: StageSlot, stage: Option<Box<dyn ProviderStage>>) {
        if stage.is_none() && self.stages[slot as usize].is_none() {
            return;
        }
        self.flush_stages();
        self.stages[slot as usize] = stage;
    }

    /// Replace the timestretch stage
    pub fn set_timestretch(&mut self, stage: Option<TimestretchStage>) {
        if stage.is_none() && self.timestretch.is_none() {
            return;
        }
        self.flush_stages();
        self.timestretch = stage;
    }

    /// Swap the input provider
    ///
    /// Returns false when both old and new are absent. Otherwise stages
    /// release into the old input and then drop their buffered state, so no
    /// stale frames cross the discontinuity.
    pub fn set_input(&mut self, input: Option<Box<dyn BufferProvider>>) -> bool {
        if input.is_none() && self.input.is_none() {
            return false;
        }
        self.flush_stages();
        for stage in self.stages.iter_mut().flatten() {
            stage.reset();
        }
        if let Some(ts) = self.timestretch.as_mut() {
            ts.reset();
        }
        self.input = input;
        true
    }

    /// Tear down every stage from the top, returning held frames upstream
    fn flush_stages(&mut self) {
        let Self {
            input,
            stages,
            timestretch,
        } = self;
        if let Some(ts) = timestretch.as_mut() {
            let mut upstream = Upstream {
                stages: &mut stages[..],
                input: &mut *input,
            };
            ts.teardown(&mut upstream);
        }
        for i in (0..SLOT_COUNT).rev() {
            let (below, rest) = stages.split_at_mut(i);
            if let Some(stage) = rest[0].as_mut() {
                let mut upstream = Upstream {
                    stages: below,
                    input: &mut *input,
                };
                stage.teardown(&mut upstream);
            }
        }
    }
}

impl BufferProvider for ProviderChain {
    fn get_next_buffer(&mut self, frames: usize) -> Option<usize> {
        if frames == 0 {
            return None;
        }
        let Self {
            input,
            stages,
            timestretch,
        } = self;
        let mut upstream = Upstream {
            stages: &mut stages[..],
            input,
        };
        match timestretch.as_mut() {
            Some(ts) => ts.get_next_buffer(&mut upstream, frames),
            None => upstream.get_next_buffer(frames),
        }
    }

    fn buffer(&self) -> &[u8] {
        if let Some(ts) = self.timestretch.as_ref() {
            return ts.buffer();
        }
        match self.stages.iter().rposition(Option::is_some) {
            Some(i) => self.stages[i].as_ref().map(|s| s.buffer()).unwrap_or(&[]),
            None => self.input.as_ref().map(|p| p.buffer()).unwrap_or(&[]),
        }
    }

    fn release_buffer(&mut self, frames: usize) {
        let Self {
            input,
            stages,
            timestretch,
        } = self;
        let mut upstream = Upstream {
            stages: &mut stages[..],
            input,
        };
        match timestretch.as_mut() {
            Some(ts) => ts.release_buffer(&mut upstream, frames),
            None => upstream.release_buffer(frames),
        }
    }

    fn reset(&mut self) {
        for stage in self.stages.iter_mut().flatten() {
            stage.reset();
        }
        if let Some(ts) = self.timestretch.as_mut() {
            ts.reset();
        }
        if let Some(input) = self.input.as_mut() {
            input.reset();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake providers shared by unit tests across the crate

    use std::cell::Cell;
    use std::rc::Rc;

    use super::BufferProvider;

    /// Serves a fixed byte stream, at most `chunk` frames per get
    ///
    /// Counts gets, releases and released frames through shared cells so
    /// tests can inspect them after handing the provider to the mixer.
    pub struct FakeProvider {
        data: Vec<u8>,
        frame_size: usize,
        chunk: usize,
        pos: usize,
        held: usize,
        /// Gets allowed before reporting exhaustion (`usize::MAX` = unlimited)
        pub gets_before_null: usize,
        /// Loop the stream instead of running dry
        pub looping: bool,
        pub gets: Rc<Cell<usize>>,
        pub releases: Rc<Cell<usize>>,
        pub released_frames: Rc<Cell<usize>>,
    }

    impl FakeProvider {
        pub fn new(data: Vec<u8>, frame_size: usize) -> Self {
            Self {
                data,
                frame_size,
                chunk: usize::MAX,
                pos: 0,
                held: 0,
                gets_before_null: usize::MAX,
                looping: false,
                gets: Rc::new(Cell::new(0)),
                releases: Rc::new(Cell::new(0)),
                released_frames: Rc::new(Cell::new(0)),
            }
        }

        pub fn from_i16(samples: &[i16], channels: usize) -> Self {
            Self::new(bytemuck::cast_slice(samples).to_vec(), 2 * channels)
        }

        pub fn from_f32(samples: &[f32], channels: usize) -> Self {
            Self::new(bytemuck::cast_slice(samples).to_vec(), 4 * channels)
        }

        /// Constant 16-bit signal, `frames` frames long
        pub fn constant_i16(value: i16, channels: usize, frames: usize) -> Self {
            Self::from_i16(&vec![value; channels * frames], channels)
        }

        pub fn with_chunk(mut self, chunk: usize) -> Self {
            self.chunk = chunk;
            self
        }

        pub fn looping(mut self) -> Self {
            self.looping = true;
            self
        }

        fn total_frames(&self) -> usize {
            self.data.len() / self.frame_size
        }
    }

    impl BufferProvider for FakeProvider {
        fn get_next_buffer(&mut self, frames: usize) -> Option<usize> {
            self.gets.set(self.gets.get() + 1);
            if self.gets.get() > self.gets_before_null {
                return None;
            }
            if self.looping && self.pos >= self.total_frames() {
                self.pos = 0;
            }
            let avail = self.total_frames().saturating_sub(self.pos);
            let n = frames.min(avail).min(self.chunk);
            if n == 0 {
                return None;
            }
            self.held = n;
            Some(n)
        }

        fn buffer(&self) -> &[u8] {
            let start = self.pos * self.frame_size;
            &self.data[start..start + self.held * self.frame_size]
        }

        fn release_buffer(&mut self, frames: usize) {
            self.releases.set(self.releases.get() + 1);
            self.released_frames.set(self.released_frames.get() + frames);
            self.pos += frames.min(self.held);
            self.held = 0;
        }
    }

    /// Serves 16-bit frames from an odd address
    pub struct MisalignedProvider {
        raw: Vec<u8>,
        offset: usize,
        frame_size: usize,
        held: usize,
        pub releases: Rc<Cell<usize>>,
    }

    impl MisalignedProvider {
        pub fn new(value: i16, channels: usize, frames: usize) -> Self {
            let frame_size = 2 * channels;
            let mut raw = vec![0u8; frame_size * frames + 2];
            let offset = if raw.as_ptr() as usize % 2 == 0 { 1 } else { 2 };
            for chunk in raw[offset..offset + frame_size * frames].chunks_exact_mut(2) {
                chunk.copy_from_slice(&value.to_ne_bytes());
            }
            Self {
                raw,
                offset,
                frame_size,
                held: 0,
                releases: Rc::new(Cell::new(0)),
            }
        }
    }

    impl BufferProvider for MisalignedProvider {
        fn get_next_buffer(&mut self, frames: usize) -> Option<usize> {
            let total = (self.raw.len() - 2) / self.frame_size;
            self.held = frames.min(total);
            (self.held > 0).then_some(self.held)
        }

        fn buffer(&self) -> &[u8] {
            &self.raw[self.offset..self.offset + self.held * self.frame_size]
        }

        fn release_buffer(&mut self, _frames: usize) {
            self.releases.set(self.releases.get() + 1);
            self.held = 0;
        }
    }
}
