//! Post-processing hooks run over mixed frames.

/// Identifies a processor attached to a chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ProcessorId(pub(crate) u64);

/// A hook that rewrites interleaved f32 frames in place.
///
/// Processors run on the audio thread with the engine lock held, so they must
/// not block or allocate. Any `FnMut(&mut [f32], usize) + Send` closure is a
/// processor:
///
/// ```
/// # use mischer::{AudioEngine, OutputFormat};
/// let engine = AudioEngine::offline(OutputFormat::stereo_f32(48_000));
/// let half = engine.attach_global_processor(|frames: &mut [f32], _count: usize| {
///     frames.iter_mut().for_each(|s| *s *= 0.5);
/// });
/// # let _ = half;
/// ```
pub trait Processor: Send + 'static {
    /// Process `frame_count` frames. `frames` holds exactly
    /// `frame_count * channels` samples.
    fn process(&mut self, frames: &mut [f32], frame_count: usize);
}

impl<F> Processor for F
where
    F: FnMut(&mut [f32], usize) + Send + 'static,
{
    #[inline]
    fn process(&mut self, frames: &mut [f32], frame_count: usize) {
        self(frames, frame_count)
    }
}

/// Ordered list of processors, run first to last.
#[derive(Default)]
pub struct ProcessorChain {
    nodes: Vec<(ProcessorId, Box<dyn Processor>)>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Append a processor under the given id.
    pub(crate) fn attach(&mut self, id: ProcessorId, processor: Box<dyn Processor>) {
        self.nodes.push((id, processor));
    }

    /// Remove a processor, handing it back to the caller.
    pub(crate) fn detach(&mut self, id: ProcessorId) -> Option<Box<dyn Processor>> {
        let pos = self.nodes.iter().position(|(node_id, _)| *node_id == id)?;
        Some(self.nodes.remove(pos).1)
    }

    /// Run every processor over `frames`.
    #[inline]
    pub fn run(&mut self, frames: &mut [f32], frame_count: usize) {
        for (_, processor) in self.nodes.iter_mut() {
            processor.process(frames, frame_count);
        }
    }
}

impl core::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|(id, _)| id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_in_attach_order_and_detaches() {
        let mut chain = ProcessorChain::new();
        chain.attach(ProcessorId(1), Box::new(|f: &mut [f32], _: usize| f[0] += 1.0));
        chain.attach(ProcessorId(2), Box::new(|f: &mut [f32], _: usize| f[0] *= 10.0));

        let mut frames = [0.0f32; 2];
        chain.run(&mut frames, 1);
        assert_eq!(frames[0], 10.0);

        assert!(chain.detach(ProcessorId(1)).is_some());
        assert!(chain.detach(ProcessorId(1)).is_none());
        assert_eq!(chain.len(), 1);

        let mut frames = [1.0f32; 2];
        chain.run(&mut frames, 1);
        assert_eq!(frames[0], 10.0);
    }
}
