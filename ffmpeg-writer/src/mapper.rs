//! Source track to output track bookkeeping.

use std::collections::HashMap;

use crate::{media::MediaKind, timestamp::TrackTiming};

/// Where a source track ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackMapping {
    pub source_index: usize,
    /// `None` when the track is excluded from the output.
    pub output_index: Option<usize>,
    pub kind: MediaKind,
}

/// Per output track state. Slots are allocated in order and never removed
/// individually, so they live in a dense `Vec` indexed by output index.
pub struct OutputTrack<E> {
    source_index: usize,
    timing: TrackTiming,
    encoder: Option<E>,
}

impl<E> OutputTrack<E> {
    pub fn source_index(&self) -> usize {
        self.source_index
    }

    pub fn timing(&self) -> &TrackTiming {
        &self.timing
    }

    pub fn timing_mut(&mut self) -> &mut TrackTiming {
        &mut self.timing
    }

    pub fn encoder(&self) -> Option<&E> {
        self.encoder.as_ref()
    }

    pub fn encoder_mut(&mut self) -> Option<&mut E> {
        self.encoder.as_mut()
    }

    pub fn is_transcoded(&self) -> bool {
        self.encoder.is_some()
    }
}

pub struct TrackMapper<E> {
    mapping: HashMap<usize, TrackMapping>,
    outputs: Vec<OutputTrack<E>>,
}

impl<E> Default for TrackMapper<E> {
    fn default() -> Self {
        Self {
            mapping: HashMap::new(),
            outputs: Vec::new(),
        }
    }
}

impl<E> TrackMapper<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(&mut self, source_index: usize, kind: MediaKind) {
        self.mapping.insert(
            source_index,
            TrackMapping {
                source_index,
                output_index: None,
                kind,
            },
        );
    }

    /// Record `source_index` as feeding the next output slot.
    ///
    /// `output_index` is the index the container gave the new stream; the
    /// container allocates streams in the same order, so it equals the slot.
    pub fn assign(
        &mut self,
        source_index: usize,
        kind: MediaKind,
        output_index: usize,
        encoder: Option<E>,
    ) {
        debug_assert_eq!(output_index, self.outputs.len());
        self.mapping.insert(
            source_index,
            TrackMapping {
                source_index,
                output_index: Some(output_index),
                kind,
            },
        );
        self.outputs.push(OutputTrack {
            source_index,
            timing: TrackTiming::new(),
            encoder,
        });
    }

    pub fn mapping(&self, source_index: usize) -> Option<&TrackMapping> {
        self.mapping.get(&source_index)
    }

    /// Output slot for a source track; `None` if excluded or never registered.
    pub fn output_index(&self, source_index: usize) -> Option<usize> {
        self.mapping
            .get(&source_index)
            .and_then(|m| m.output_index)
    }

    pub fn track(&self, output_index: usize) -> Option<&OutputTrack<E>> {
        self.outputs.get(output_index)
    }

    pub fn track_mut(&mut self, output_index: usize) -> Option<&mut OutputTrack<E>> {
        self.outputs.get_mut(output_index)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Every decode-time baseline back to unknown.
    pub fn reset_timing(&mut self) {
        for track in &mut self.outputs {
            track.timing.reset();
        }
    }

    /// Drop all mappings, timing state and encoders.
    pub fn clear(&mut self) {
        self.mapping.clear();
        self.outputs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_and_mapped_tracks() {
        let mut mapper: TrackMapper<()> = TrackMapper::new();
        mapper.assign(0, MediaKind::Video, 0, None);
        mapper.exclude(1, MediaKind::Other);
        mapper.assign(2, MediaKind::Audio, 1, Some(()));

        assert_eq!(mapper.output_index(0), Some(0));
        assert_eq!(mapper.output_index(1), None);
        assert_eq!(mapper.output_index(2), Some(1));
        assert_eq!(mapper.output_index(9), None);
        assert_eq!(mapper.mapping(1).map(|m| m.kind), Some(MediaKind::Other));
        assert_eq!(mapper.len(), 2);
        assert!(mapper.track(1).is_some_and(|t| t.is_transcoded()));
        assert_eq!(mapper.track(1).map(|t| t.source_index()), Some(2));
    }

    #[test]
    fn clear_resets_everything() {
        let mut mapper: TrackMapper<()> = TrackMapper::new();
        mapper.assign(0, MediaKind::Video, 0, None);
        let mut pts = Some(5);
        let mut dts = Some(5);
        if let Some(track) = mapper.track_mut(0) {
            track.timing_mut().correct(&mut pts, &mut dts);
        }
        assert_eq!(mapper.track(0).and_then(|t| t.timing().last_dts()), Some(5));

        mapper.reset_timing();
        assert_eq!(mapper.track(0).and_then(|t| t.timing().last_dts()), None);

        mapper.clear();
        assert!(mapper.is_empty());
        assert_eq!(mapper.output_index(0), None);
    }
}
