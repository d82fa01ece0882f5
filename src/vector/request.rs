use bitflags::bitflags;
use geo_types::Rect;

bitflags! {
    /// Flags shaping what a [`FeatureRequest`] decodes or how it filters.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RequestFlags: u32 {
        /// Leave the geometry undecoded.
        const NO_GEOMETRY = 0x01;
        /// Decode only the attributes listed in the request.
        const SUBSET_OF_ATTRIBUTES = 0x02;
        /// Test the filter rectangle against the exact geometry instead of
        /// its bounding box.
        const EXACT_INTERSECT = 0x04;
    }
}

bitflags! {
    /// What a layer supports beyond sequential reads.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// Features can be fetched by id without a full scan.
        const SELECT_AT_ID = 0x01;
        /// Geometries can be fetched by id without a full scan.
        const SELECT_GEOMETRY_AT_ID = 0x02;
    }
}

/// Row selection of a [`FeatureRequest`].
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FeatureFilter {
    #[default]
    None,
    Rect(Rect<f64>),
    Fid(i64),
    Fids(Vec<i64>),
}

/// Describes which features to fetch and what to decode from them.
///
/// ```
/// use vlayer::vector::{FeatureRequest, RequestFlags};
///
/// let request = FeatureRequest::new()
///     .with_filter_rect(geo_types::Rect::new((0., 0.), (10., 10.)))
///     .with_subset_of_attributes(vec![0])
///     .with_flags(RequestFlags::NO_GEOMETRY);
/// assert!(request.flags().contains(RequestFlags::SUBSET_OF_ATTRIBUTES));
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureRequest {
    filter: FeatureFilter,
    flags: RequestFlags,
    attributes: Option<Vec<usize>>,
}

impl FeatureRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter_rect(mut self, rect: Rect<f64>) -> Self {
        self.filter = FeatureFilter::Rect(rect);
        self
    }

    pub fn with_fid(mut self, fid: i64) -> Self {
        self.filter = FeatureFilter::Fid(fid);
        self
    }

    pub fn with_fids(mut self, fids: Vec<i64>) -> Self {
        self.filter = FeatureFilter::Fids(fids);
        self
    }

    /// Restricts decoding to the given attribute indices.
    pub fn with_subset_of_attributes(mut self, attributes: Vec<usize>) -> Self {
        self.attributes = Some(attributes);
        self.flags |= RequestFlags::SUBSET_OF_ATTRIBUTES;
        self
    }

    pub fn with_flags(mut self, flags: RequestFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn filter(&self) -> &FeatureFilter {
        &self.filter
    }

    pub fn flags(&self) -> RequestFlags {
        self.flags
    }

    pub fn subset_of_attributes(&self) -> Option<&[usize]> {
        if self.flags.contains(RequestFlags::SUBSET_OF_ATTRIBUTES) {
            self.attributes.as_deref()
        } else {
            None
        }
    }
}
