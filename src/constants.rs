//! Point-goal navigation task constants.
//!
//! Reward shaping and motion parameters follow the standard PointNav task
//! configuration; camera parameters match what the batch renderer expects.

use std::f32::consts::PI;

// ============================================================================
// Reward Shaping
// ============================================================================

/// Reward granted on a successful stop, scaled by SPL.
pub const SUCCESS_REWARD: f32 = 2.5;

/// Per-step slack penalty.
pub const SLACK_REWARD: f32 = 1e-2;

/// A stop within this geodesic distance of the goal (meters) is a success.
pub const SUCCESS_DISTANCE: f32 = 0.2;

// ============================================================================
// Episode Limits
// ============================================================================

/// Step count at which an episode terminates regardless of agent actions.
pub const MAX_STEPS: u32 = 500;

// ============================================================================
// Motion
// ============================================================================

/// Translation per MoveForward action (meters).
pub const FORWARD_STEP_SIZE: f32 = 0.25;

/// Yaw per TurnLeft / TurnRight action (radians): 10 degrees.
pub const TURN_ANGLE: f32 = 10.0 * PI / 180.0;

/// World up axis.
pub const UP_VECTOR: [f32; 3] = [0.0, 1.0, 0.0];

/// Camera-frame forward vector scaled by the step size.
pub const CAM_FWD_VECTOR: [f32; 3] = [0.0, 0.0, -FORWARD_STEP_SIZE];

// ============================================================================
// Camera
// ============================================================================

/// Camera eye height above the agent position (meters).
pub const CAMERA_HEIGHT: f32 = 1.25;

/// Field of view handed to the renderer (degrees).
pub const CAMERA_FOV_DEG: f32 = 90.0;

/// Near clip plane.
pub const CAMERA_NEAR: f32 = 0.1;

/// Far clip plane.
pub const CAMERA_FAR: f32 = 1000.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_angle_is_ten_degrees() {
        assert!((TURN_ANGLE - 0.17453294).abs() < 1e-6);
        // 36 turns complete a full revolution
        assert!((36.0 * TURN_ANGLE - 2.0 * PI).abs() < 1e-5);
    }

    #[test]
    fn test_forward_steps_cover_unit_distance() {
        // Four forward steps cover exactly one meter
        assert_eq!(4.0 * FORWARD_STEP_SIZE, 1.0);
    }

    #[test]
    fn test_cam_fwd_points_down_negative_z() {
        assert_eq!(CAM_FWD_VECTOR, [0.0, 0.0, -FORWARD_STEP_SIZE]);
    }
}
