use formats::ImageApiVersion;

use crate::tile::Tile;

/// IIIF Image API request URL for a tile:
/// `{base}/{region}/{size}/0/default.jpg`.
///
/// A tile spanning the whole image uses the canonical `full` region. Size is
/// width-based (`w,`) for Image API v2 and explicit (`w,h`) for v3.
pub fn tile_url(base_id: &str, tile: &Tile, version: ImageApiVersion) -> String {
    let region = tile.resource_region();
    let full_image =
        region.x == 0
        && region.y == 0
        && region.width == tile.level.image_width
        && region.height == tile.level.image_height;

    let region_segment = if full_image {
        "full".to_string()
    } else {
        format!("{},{},{},{}", region.x, region.y, region.width, region.height)
    };

    let (scaled_width, scaled_height) = tile.scaled_size();
    let size_segment = match version {
        ImageApiVersion::V2 => format!("{scaled_width},"),
        ImageApiVersion::V3 => format!("{scaled_width},{scaled_height}"),
    };

    format!("{base_id}/{region_segment}/{size_segment}/0/default.jpg")
}
