//! Draw buckets over the bucket-ordered instance id list.

use std::ops::Range;

use prism_core::{MeshId, ShaderId};

/// A run of instances sharing one shader and one mesh: one instanced draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderBucket {
    /// Shader of every instance in the run.
    pub shader: ShaderId,
    /// Mesh of every instance in the run.
    pub mesh: MeshId,
    /// First entry in the instance id list.
    pub first: u32,
    /// Number of entries.
    pub count: u32,
}

impl RenderBucket {
    /// Entries of the instance id list this bucket covers.
    #[inline]
    #[must_use]
    pub const fn range(&self) -> Range<u32> {
        self.first..self.first + self.count
    }
}

/// The buckets published by one batcher tick.
///
/// `instance_ids` holds slots ordered by `(shader, mesh, slot)`; each bucket
/// is a contiguous run of it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderBuckets {
    tick: u64,
    buckets: Vec<RenderBucket>,
    instance_ids: Vec<u32>,
}

impl RenderBuckets {
    /// Builds buckets from `(shader, mesh, slot)` entries already sorted.
    pub(crate) fn from_sorted(
        tick: u64,
        entries: impl IntoIterator<Item = (ShaderId, MeshId, u32)>,
    ) -> Self {
        let mut buckets: Vec<RenderBucket> = Vec::new();
        let mut instance_ids = Vec::new();

        for (shader, mesh, slot) in entries {
            let first = instance_ids.len() as u32;
            instance_ids.push(slot);
            match buckets.last_mut() {
                Some(run) if run.shader == shader && run.mesh == mesh => run.count += 1,
                _ => buckets.push(RenderBucket {
                    shader,
                    mesh,
                    first,
                    count: 1,
                }),
            }
        }

        Self {
            tick,
            buckets,
            instance_ids,
        }
    }

    /// Batcher tick these buckets were built on (0 before the first tick).
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Buckets in draw order.
    #[inline]
    #[must_use]
    pub fn buckets(&self) -> &[RenderBucket] {
        &self.buckets
    }

    /// Slot list the buckets index into.
    #[inline]
    #[must_use]
    pub fn instance_ids(&self) -> &[u32] {
        &self.instance_ids
    }

    /// Slots covered by `bucket`.
    #[must_use]
    pub fn slots(&self, bucket: &RenderBucket) -> &[u32] {
        &self.instance_ids[bucket.first as usize..(bucket.first + bucket.count) as usize]
    }

    /// Number of buckets.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True if nothing is drawn.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total instances across all buckets.
    #[inline]
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instance_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_split_on_shader_or_mesh_change() {
        let entries = [
            (ShaderId(0), MeshId(0), 4),
            (ShaderId(0), MeshId(0), 7),
            (ShaderId(0), MeshId(1), 2),
            (ShaderId(1), MeshId(1), 0),
        ];
        let buckets = RenderBuckets::from_sorted(3, entries);

        assert_eq!(buckets.tick(), 3);
        assert_eq!(buckets.instance_ids(), &[4, 7, 2, 0]);
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets.buckets()[0].range(), 0..2);
        assert_eq!(buckets.slots(&buckets.buckets()[1]), &[2]);
        assert_eq!(buckets.buckets()[2].shader, ShaderId(1));
    }

    #[test]
    fn test_empty() {
        let buckets = RenderBuckets::from_sorted(1, []);
        assert!(buckets.is_empty());
        assert_eq!(buckets.instance_count(), 0);
    }
}
