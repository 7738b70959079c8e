//! Legacy schema masks and their translation to buffer lists

use serde::{Deserialize, Serialize};
use std::fmt;

use super::BufferId;

/// Bit constants of the legacy schema mask.
pub mod bits {
    /// Radial distance image
    pub const IMG_RDIS: u16 = 1 << 0;
    /// Normalized amplitude image
    pub const IMG_AMP: u16 = 1 << 1;
    /// Raw amplitude image
    pub const IMG_RAMP: u16 = 1 << 2;
    /// Cartesian point cloud
    pub const IMG_CART: u16 = 1 << 3;
}

/// Fixed translation table. Output order follows this table, not bit order.
const SCHEMA_TABLE: [(u16, BufferId); 4] = [
    (bits::IMG_RDIS, BufferId::RadialDistanceImage),
    (bits::IMG_AMP, BufferId::NormAmplitudeImage),
    (bits::IMG_RAMP, BufferId::AmplitudeImage),
    (bits::IMG_CART, BufferId::Xyz),
];

/// Bitmask selecting which data products a session retrieves per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaMask(pub u16);

impl SchemaMask {
    /// Distance, both amplitudes and the point cloud.
    pub const DEFAULT: SchemaMask =
        SchemaMask(bits::IMG_RDIS | bits::IMG_AMP | bits::IMG_RAMP | bits::IMG_CART);

    /// Create a new mask from its raw value.
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Check if every bit of `flag` is set.
    pub fn has_flag(&self, flag: u16) -> bool {
        (self.0 & flag) == flag
    }

    /// Bits set in this mask that the translation table does not know about.
    pub fn unknown_bits(&self) -> u16 {
        let known = SCHEMA_TABLE.iter().fold(0u16, |acc, (bit, _)| acc | bit);
        self.0 & !known
    }

    /// Translate this mask into the buffers a frame grabber must retrieve.
    pub fn translate(&self) -> BufferList {
        translate(*self)
    }
}

impl Default for SchemaMask {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for SchemaMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Map a legacy schema mask to the ordered list of buffer ids it selects.
///
/// Unknown bits are ignored. The result is in translation-table order so that
/// downstream buffer indexing is reproducible.
pub fn translate(mask: SchemaMask) -> BufferList {
    BufferList(
        SCHEMA_TABLE
            .iter()
            .filter(|(bit, _)| mask.has_flag(*bit))
            .map(|(_, id)| *id)
            .collect(),
    )
}

/// Ordered set of buffer ids requested from a frame grabber.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferList(Vec<BufferId>);

impl BufferList {
    /// Build a list from ids, dropping duplicates while keeping first occurrence order.
    pub fn new(ids: impl IntoIterator<Item = BufferId>) -> Self {
        let mut list = Self::default();
        for id in ids {
            list.push(id);
        }
        list
    }

    /// Buffers a session requests for `mask`: the translated list, followed by
    /// the ancillary buffers when anything was selected at all.
    pub fn for_acquisition(mask: SchemaMask) -> Self {
        let mut list = translate(mask);
        if !list.is_empty() {
            for id in BufferId::ANCILLARY {
                list.push(id);
            }
        }
        list
    }

    /// Append an id unless it is already present.
    pub fn push(&mut self, id: BufferId) {
        if !self.0.contains(&id) {
            self.0.push(id);
        }
    }

    /// Check if the list contains `id`.
    pub fn contains(&self, id: BufferId) -> bool {
        self.0.contains(&id)
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is requested.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate ids in order.
    pub fn iter(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.0.iter().copied()
    }

    /// Borrow the ids as a slice.
    pub fn as_slice(&self) -> &[BufferId] {
        &self.0
    }
}

impl From<Vec<BufferId>> for BufferList {
    fn from(ids: Vec<BufferId>) -> Self {
        Self::new(ids)
    }
}

impl fmt::Display for BufferList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(BufferId::name).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_mask_translates_to_empty_list() {
        assert!(translate(SchemaMask(0)).is_empty());
        assert!(BufferList::for_acquisition(SchemaMask(0)).is_empty());
    }

    #[test]
    fn distance_and_cloud_keep_table_order() {
        let list = translate(SchemaMask(0b1001));
        assert_eq!(list.as_slice(), &[BufferId::RadialDistanceImage, BufferId::Xyz]);
    }

    #[test]
    fn default_mask_selects_all_four_products() {
        let list = SchemaMask::default().translate();
        assert_eq!(
            list.as_slice(),
            &[
                BufferId::RadialDistanceImage,
                BufferId::NormAmplitudeImage,
                BufferId::AmplitudeImage,
                BufferId::Xyz
            ]
        );
    }

    #[test]
    fn acquisition_list_appends_ancillary_buffers() {
        let list = BufferList::for_acquisition(SchemaMask(bits::IMG_AMP));
        assert_eq!(list.as_slice()[0], BufferId::NormAmplitudeImage);
        for id in BufferId::ANCILLARY {
            assert!(list.contains(id));
        }
        assert_eq!(list.len(), 1 + BufferId::ANCILLARY.len());
    }

    #[test]
    fn unknown_bits_are_reported_but_ignored() {
        let mask = SchemaMask(0b1_0000_0001);
        assert_eq!(mask.unknown_bits(), 0b1_0000_0000);
        assert_eq!(translate(mask).as_slice(), &[BufferId::RadialDistanceImage]);
    }

    #[test]
    fn buffer_list_drops_duplicates() {
        let list = BufferList::new([BufferId::Xyz, BufferId::Xyz, BufferId::AmplitudeImage]);
        assert_eq!(list.as_slice(), &[BufferId::Xyz, BufferId::AmplitudeImage]);
        assert_eq!(list.to_string(), "[XYZ, AMPLITUDE_IMAGE]");
    }

    proptest! {
        #[test]
        fn prop_translate_is_deterministic(mask in any::<u16>()) {
            prop_assert_eq!(translate(SchemaMask(mask)), translate(SchemaMask(mask)));
        }

        #[test]
        fn prop_translate_contains_id_iff_bit_set(mask in any::<u16>()) {
            let list = translate(SchemaMask(mask));
            for (bit, id) in SCHEMA_TABLE {
                prop_assert_eq!(list.contains(id), mask & bit != 0);
            }
            for id in BufferId::ANCILLARY {
                prop_assert!(!list.contains(id));
            }
        }

        #[test]
        fn prop_translate_follows_table_order(mask in any::<u16>()) {
            let list = translate(SchemaMask(mask));
            let positions: Vec<usize> = list
                .iter()
                .map(|id| SCHEMA_TABLE.iter().position(|(_, t)| *t == id).unwrap())
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn prop_unknown_bits_do_not_change_translation(mask in 0u16..16, extra in any::<u16>()) {
            let noisy = mask | (extra & !0xf);
            prop_assert_eq!(translate(SchemaMask(mask)), translate(SchemaMask(noisy)));
        }
    }
}
