//! Ordered page store between the renderers and the reconstructor.
//!
//! Fallback renders complete out of order (they run as concurrent
//! subprocesses), so the document cannot simply be assembled in completion
//! order. The store re-establishes page order structurally: pages are keyed
//! by index and [`PageStore::drain`] always yields strictly increasing
//! indices, whatever order the appends arrived in.
//!
//! Pages are stored already encoded (see [`crate::pipeline::encode`]), so a
//! large document holds compressed page images rather than raw pixel
//! buffers while it waits for assembly.

use crate::output::PageGeometry;
use crate::pipeline::encode::EncodedImage;
use std::collections::BTreeMap;

/// One output-ready page: source geometry plus the encoded raster.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    /// 0-based source page index.
    pub index: usize,
    /// Output page size in points, taken from the source page.
    pub geometry: PageGeometry,
    pub image: EncodedImage,
}

/// Append-only store that yields pages in page-index order.
#[derive(Debug, Default)]
pub struct PageStore {
    pages: BTreeMap<usize, EncodedPage>,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page. Each index must be appended at most once.
    pub fn append(&mut self, page: EncodedPage) {
        let replaced = self.pages.insert(page.index, page);
        debug_assert!(replaced.is_none(), "page appended twice");
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Consume the store, yielding pages in strictly increasing index order.
    ///
    /// Each page's image buffer is released as soon as the reconstructor
    /// consumes it; nothing is retained here afterwards.
    pub fn drain(self) -> Vec<EncodedPage> {
        self.pages.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::{ColorSpace, CompressionFilter};

    fn page(index: usize) -> EncodedPage {
        EncodedPage {
            index,
            geometry: PageGeometry {
                width_pts: 612.0,
                height_pts: 792.0,
            },
            image: EncodedImage {
                data: vec![0xAB; 8],
                pixel_width: 10,
                pixel_height: 10,
                color_space: ColorSpace::DeviceRgb,
                filter: CompressionFilter::Dct,
            },
        }
    }

    #[test]
    fn drain_restores_index_order() {
        let mut store = PageStore::new();
        for i in [3usize, 0, 4, 1, 2] {
            store.append(page(i));
        }
        assert_eq!(store.len(), 5);

        let indices: Vec<usize> = store.drain().into_iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn empty_store_drains_empty() {
        let store = PageStore::new();
        assert!(store.is_empty());
        assert!(store.drain().is_empty());
    }
}
