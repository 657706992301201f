//! DeepZoom level arithmetic.
//!
//! DeepZoom addresses resolutions coarsest-to-finest: level 0 is a 1x1 pixel
//! image and the maximum level is the full resolution. A server pyramid only
//! stores a handful of discrete resolutions, so the client level count is
//! generally larger than the server's. The functions here reconcile the two
//! schemes; they are pure and applied independently per source, because each
//! source may have a different native pyramid depth for the same client
//! resolution.
//!
//! Within the crate, server resolutions are also counted coarsest-first
//! (0 = smallest stored image). [`pyramid_level`] converts such a resolution
//! into the finest-first level index used by
//! [`PyramidImage`](crate::image::PyramidImage).

/// Number of DeepZoom levels implied by the full-resolution dimensions.
///
/// `client_levels = ceil(log2(max(width, height)))`
pub fn client_level_count(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height) as f64;
    if max_dim <= 1.0 {
        return 0;
    }
    max_dim.log2().ceil() as u32
}

/// Map a client resolution index onto the server pyramid.
///
/// Accounts for the extra zoom levels the DeepZoom scheme requires beyond
/// what the pyramid stores, then clamps into `[0, server_levels - 1]`.
/// Deterministic, no failure mode.
pub fn map_resolution(client_resolution: i64, server_levels: u32, client_levels: u32) -> u32 {
    if server_levels == 0 {
        return 0;
    }
    let mapped = client_resolution - (client_levels as i64 - server_levels as i64) - 1;
    mapped.clamp(0, server_levels as i64 - 1) as u32
}

/// Convert a coarsest-first server resolution into a finest-first pyramid
/// level index.
pub fn pyramid_level(server_resolution: u32, num_levels: usize) -> usize {
    num_levels.saturating_sub(1).saturating_sub(server_resolution as usize)
}

/// Number of tile columns in a level of the given pixel width.
pub fn tiles_per_row(level_width: u32, tile_width: u32) -> u32 {
    level_width.div_ceil(tile_width).max(1)
}

/// Linear tile index for (x, y) within a level.
///
/// Kept signed so that negative client coordinates surface as the fetch
/// stage's precondition failure instead of wrapping.
pub fn tile_index(x: i64, y: i64, tiles_per_row: u32) -> i64 {
    y * tiles_per_row as i64 + x
}

// =============================================================================
// Tests
// =============================================================================
