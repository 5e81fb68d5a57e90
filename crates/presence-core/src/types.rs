use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A 2D landmark position in frame pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Bounding box for a detected face, in frame pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Pixel dimensions of the frame a face was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Six-point eye contours for both eyes.
///
/// Point order per eye: outer corner, two upper-lid points, inner corner,
/// two lower-lid points (p0..p5, with p1/p5 and p2/p4 vertically paired).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeLandmarks {
    pub left: [Point; 6],
    pub right: [Point; 6],
}

/// Face descriptor (embedding) vector, compared by Euclidean distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two descriptors.
    ///
    /// Returns `None` when the dimensions differ.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }

    /// True if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// One detector result for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub face: FaceBox,
    pub frame: FrameSize,
    /// Eye contours, when the detector produced landmarks.
    #[serde(default)]
    pub eyes: Option<EyeLandmarks>,
    pub descriptor: Descriptor,
    pub captured_at: DateTime<Utc>,
}

/// A descriptor and the instant it was captured; carried between ticks
/// so the next evaluation can measure inter-frame motion.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorSample {
    pub descriptor: Descriptor,
    pub captured_at: DateTime<Utc>,
}

/// An enrolled identity with its reference descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub id: String,
    pub display_name: String,
    pub descriptor: Descriptor,
    pub enrolled_at: DateTime<Utc>,
}

/// Attendance data produced by the session for one accepted event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttendance {
    pub identity_id: String,
    pub display_name: String,
    pub marked_at: DateTime<Utc>,
    pub liveness_score: f32,
}

/// A persisted attendance event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub identity_id: String,
    pub display_name: String,
    pub marked_at: DateTime<Utc>,
    pub verified: bool,
    pub liveness_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = Descriptor::new(vec![0.0, 0.0]);
        let b = Descriptor::new(vec![3.0, 4.0]);
        assert_eq!(a.euclidean_distance(&b), Some(5.0));
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(a.euclidean_distance(&a.clone()), Some(0.0));
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Descriptor::new(vec![1.0, 0.0]);
        let b = Descriptor::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), None);
    }

    #[test]
    fn test_descriptor_finite_check() {
        assert!(Descriptor::new(vec![0.5, -0.5]).is_finite());
        assert!(!Descriptor::new(vec![0.5, f32::NAN]).is_finite());
        assert!(!Descriptor::new(vec![f32::INFINITY]).is_finite());
    }

    #[test]
    fn test_point_distance() {
        let a = Point::new(1.0, 1.0);
        let b = Point::new(4.0, 5.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }
}
