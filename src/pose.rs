//! Joint angles from normalized body landmarks.
//!
//! Landmarks follow the 33-point full-body index scheme; only the shoulders,
//! elbows, wrists, hips, knees and ankles are used here.

use serde::{Deserialize, Serialize};

pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_ELBOW: usize = 13;
pub const RIGHT_ELBOW: usize = 14;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;
pub const LEFT_KNEE: usize = 25;
pub const RIGHT_KNEE: usize = 26;
pub const LEFT_ANKLE: usize = 27;
pub const RIGHT_ANKLE: usize = 28;

/// Skeleton segments drawn by an overlay: torso, arms, legs.
pub const POSE_CONNECTIONS: [(usize, usize); 12] = [
    (LEFT_SHOULDER, RIGHT_SHOULDER),
    (LEFT_SHOULDER, LEFT_HIP),
    (RIGHT_SHOULDER, RIGHT_HIP),
    (LEFT_HIP, RIGHT_HIP),
    (LEFT_SHOULDER, LEFT_ELBOW),
    (LEFT_ELBOW, LEFT_WRIST),
    (RIGHT_SHOULDER, RIGHT_ELBOW),
    (RIGHT_ELBOW, RIGHT_WRIST),
    (LEFT_HIP, LEFT_KNEE),
    (LEFT_KNEE, LEFT_ANKLE),
    (RIGHT_HIP, RIGHT_KNEE),
    (RIGHT_KNEE, RIGHT_ANKLE),
];

/// A landmark in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Angle at `b` between the segments towards `a` and `c`, in degrees within [0, 180].
pub fn angle(a: Landmark, b: Landmark, c: Landmark) -> f64 {
    let radians = (c.y - b.y).atan2(c.x - b.x) - (a.y - b.y).atan2(a.x - b.x);
    let degrees = radians.to_degrees().abs();
    if degrees > 180.0 {
        360.0 - degrees
    } else {
        degrees
    }
}

/// The eight joint angles reported to the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseAngles {
    pub left_elbow: f64,
    pub right_elbow: f64,
    pub left_shoulder: f64,
    pub right_shoulder: f64,
    pub left_hip: f64,
    pub right_hip: f64,
    pub left_knee: f64,
    pub right_knee: f64,
}

impl PoseAngles {
    /// Computes the angles of one detected person.
    ///
    /// Returns `None` when the landmark set is too short to contain both ankles.
    pub fn from_landmarks(landmarks: &[Landmark]) -> Option<Self> {
        if landmarks.len() <= RIGHT_ANKLE {
            return None;
        }
        let at = |i: usize| landmarks[i];
        Some(Self {
            left_elbow: angle(at(LEFT_SHOULDER), at(LEFT_ELBOW), at(LEFT_WRIST)),
            right_elbow: angle(at(RIGHT_SHOULDER), at(RIGHT_ELBOW), at(RIGHT_WRIST)),
            left_shoulder: angle(at(LEFT_ELBOW), at(LEFT_SHOULDER), at(LEFT_HIP)),
            right_shoulder: angle(at(RIGHT_ELBOW), at(RIGHT_SHOULDER), at(RIGHT_HIP)),
            left_hip: angle(at(LEFT_SHOULDER), at(LEFT_HIP), at(LEFT_KNEE)),
            right_hip: angle(at(RIGHT_SHOULDER), at(RIGHT_HIP), at(RIGHT_KNEE)),
            left_knee: angle(at(LEFT_HIP), at(LEFT_KNEE), at(LEFT_ANKLE)),
            right_knee: angle(at(RIGHT_HIP), at(RIGHT_KNEE), at(RIGHT_ANKLE)),
        })
    }

    /// Text payload sent to the model as a non-final user turn.
    pub fn to_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(&serde_json::json!({ "poseAngles": self }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_right_angle_is_exact() {
        let a = Landmark::new(0.0, 0.0);
        let b = Landmark::new(1.0, 0.0);
        let c = Landmark::new(1.0, 1.0);
        assert_eq!(angle(a, b, c), 90.0);
    }

    #[test]
    fn test_angle_folds_reflex_values() {
        let b = Landmark::new(0.0, 0.0);
        // 270 degrees from a to c folds to 90.
        let a = Landmark::new(0.0, -1.0);
        let c = Landmark::new(-1.0, 0.0);
        assert!((angle(a, b, c) - 90.0).abs() < 1e-9);
        // Straight limb.
        let straight = angle(Landmark::new(-1.0, 0.0), b, Landmark::new(1.0, 0.0));
        assert!((straight - 180.0).abs() < 1e-9);
        assert_eq!(angle(Landmark::new(1.0, 0.0), b, Landmark::new(1.0, 0.0)), 0.0);
    }

    #[test]
    fn test_from_landmarks_uses_mirrored_triples() {
        let mut landmarks = vec![Landmark::default(); 33];
        // Left arm bent at a right angle, right arm straight.
        landmarks[LEFT_SHOULDER] = Landmark::new(0.0, 0.0);
        landmarks[LEFT_ELBOW] = Landmark::new(0.0, 1.0);
        landmarks[LEFT_WRIST] = Landmark::new(1.0, 1.0);
        landmarks[RIGHT_SHOULDER] = Landmark::new(2.0, 0.0);
        landmarks[RIGHT_ELBOW] = Landmark::new(2.0, 1.0);
        landmarks[RIGHT_WRIST] = Landmark::new(2.0, 2.0);

        let angles = PoseAngles::from_landmarks(&landmarks).unwrap();

        assert!((angles.left_elbow - 90.0).abs() < 1e-9);
        assert!((angles.right_elbow - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_landmarks_rejects_partial_sets() {
        assert!(PoseAngles::from_landmarks(&[Landmark::default(); 28]).is_none());
    }

    #[test]
    fn test_message_is_camel_case_json() {
        let angles = PoseAngles::from_landmarks(&[Landmark::default(); 33]).unwrap();
        let json: serde_json::Value = serde_json::from_str(&angles.to_message().unwrap()).unwrap();
        assert!(json["poseAngles"]["leftKnee"].is_number());
        assert!(json["poseAngles"]["rightShoulder"].is_number());
    }
}
