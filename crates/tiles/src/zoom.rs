use formats::ImageInfo;

/// One level of an image's tile pyramid.
///
/// `scale_factor` is the downsampling factor relative to the full-resolution
/// image; a tile at this level covers `tile_width · scale_factor` resource
/// pixels horizontally.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TileZoomLevel {
    /// Position in the pyramid, ascending by scale factor.
    pub index: usize,
    pub scale_factor: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub columns: u32,
    pub rows: u32,
    /// Full-resolution image size; tile regions are clipped against it.
    pub image_width: u32,
    pub image_height: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NoZoomLevel;

impl std::fmt::Display for NoZoomLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no usable tile pyramid level")
    }
}

impl std::error::Error for NoZoomLevel {}

/// Expand an image-info document into pyramid levels, ascending by scale
/// factor. Tile specs without a height use square tiles.
pub fn pyramid_from_info(info: &ImageInfo) -> Vec<TileZoomLevel> {
    let mut levels = Vec::new();
    for spec in &info.tiles {
        let tile_width = spec.width;
        let tile_height = spec.height.unwrap_or(spec.width);
        if tile_width == 0 || tile_height == 0 {
            continue;
        }
        for &scale_factor in &spec.scale_factors {
            if scale_factor == 0 {
                continue;
            }
            let span_x = (tile_width as u64) * (scale_factor as u64);
            let span_y = (tile_height as u64) * (scale_factor as u64);
            levels.push(TileZoomLevel {
                index: 0,
                scale_factor,
                tile_width,
                tile_height,
                columns: (info.width as u64).div_ceil(span_x) as u32,
                rows: (info.height as u64).div_ceil(span_y) as u32,
                image_width: info.width,
                image_height: info.height,
            });
        }
    }
    levels.sort_by_key(|l| l.scale_factor);
    levels.dedup_by_key(|l| l.scale_factor);
    for (index, level) in levels.iter_mut().enumerate() {
        level.index = index;
    }
    levels
}

/// Pick the level whose scale factor is the largest value not exceeding
/// `resource_per_viewport_pixel`. When even the sharpest level is coarser
/// than requested, the sharpest level wins (next higher resolution).
pub fn level_for_resolution(
    levels: &[TileZoomLevel],
    resource_per_viewport_pixel: f64,
) -> Result<&TileZoomLevel, NoZoomLevel> {
    let first = levels.first().ok_or(NoZoomLevel)?;
    let mut best: Option<&TileZoomLevel> = None;
    for level in levels {
        if (level.scale_factor as f64) <= resource_per_viewport_pixel {
            best = Some(level); // levels are ascending, so the last hit wins
        }
    }
    Ok(best.unwrap_or(first))
}

/// The overview level for `chosen`: the nearest power-of-two coarser scale
/// factor, clamped to the coarsest level. `None` when nothing coarser
/// exists.
pub fn overview_level<'a>(
    levels: &'a [TileZoomLevel],
    chosen: &TileZoomLevel,
) -> Option<&'a TileZoomLevel> {
    let target = (chosen.scale_factor.max(1) as u64 * 2).next_power_of_two();
    let mut overview: Option<&TileZoomLevel> = None;
    for level in levels {
        if level.scale_factor <= chosen.scale_factor {
            continue;
        }
        if (level.scale_factor as u64) >= target {
            overview = Some(level);
            break;
        }
        // Coarser than chosen but short of the target: remember as clamp.
        overview = Some(level);
    }
    overview
}

#[cfg(test)]
mod tests {
    use super::{level_for_resolution, overview_level, pyramid_from_info};
    use formats::ImageInfo;

    fn info() -> ImageInfo {
        ImageInfo::from_json(
            r#"{
                "id": "https://iiif.example.org/image",
                "type": "ImageService3",
                "width": 5000,
                "height": 4000,
                "tiles": [{ "width": 512, "scaleFactors": [1, 2, 4, 8, 16] }]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn pyramid_counts_columns_and_rows() {
        let levels = pyramid_from_info(&info());
        assert_eq!(levels.len(), 5);

        let full = levels[0];
        assert_eq!(full.scale_factor, 1);
        assert_eq!((full.columns, full.rows), (10, 8)); // ceil(5000/512), ceil(4000/512)

        let coarse = levels[4];
        assert_eq!(coarse.scale_factor, 16);
        assert_eq!((coarse.columns, coarse.rows), (1, 1));
    }

    #[test]
    fn resolution_match_picks_largest_not_exceeding() {
        let levels = pyramid_from_info(&info());
        assert_eq!(level_for_resolution(&levels, 5.0).unwrap().scale_factor, 4);
        assert_eq!(level_for_resolution(&levels, 4.0).unwrap().scale_factor, 4);
        // Sharper than the sharpest level: fall back to scale factor 1.
        assert_eq!(level_for_resolution(&levels, 0.3).unwrap().scale_factor, 1);
        assert!(level_for_resolution(&[], 1.0).is_err());
    }

    #[test]
    fn overview_is_power_of_two_coarser_with_clamp() {
        let levels = pyramid_from_info(&info());
        let chosen = level_for_resolution(&levels, 4.0).unwrap();
        assert_eq!(overview_level(&levels, chosen).unwrap().scale_factor, 8);

        // Nothing coarser than the coarsest level.
        let coarsest = &levels[4];
        assert!(overview_level(&levels, coarsest).is_none());
    }
}
