// ============================================================================
// OPS - pixel and geometry operations behind the selection controller
// ============================================================================
//
//   outline.rs   - boundary trace, convex hull, point-in-polygon, rasterise
//   transform.rs - affine matrices and the sticky selection transform
//   resample.rs  - nearest/bilinear/EPX/Scale2x/rotation kernels
//   floating.rs  - lifted pixels, baked buffer, memoised preview, commit
// ============================================================================

pub mod floating;
pub mod outline;
pub mod resample;
pub mod transform;
