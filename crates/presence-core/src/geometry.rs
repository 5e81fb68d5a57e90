//! Per-frame geometry signals: eye aspect ratio and face size ratio.
//!
//! All functions are pure. Degenerate geometry yields `None` ("no signal")
//! so that NaN or infinity never reaches the liveness state.

use crate::types::{EyeLandmarks, FaceBox, FrameSize, Point};

/// Horizontal eye spans at or below this length (pixels) carry no signal.
const MIN_EYE_SPAN: f32 = 1e-3;

/// Eye aspect ratio of one six-point eye contour.
///
/// `(|p1 - p5| + |p2 - p4|) / (2 * |p0 - p3|)`
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> Option<f32> {
    let vertical_1 = eye[1].distance(&eye[5]);
    let vertical_2 = eye[2].distance(&eye[4]);
    let horizontal = eye[0].distance(&eye[3]);

    if !horizontal.is_finite() || horizontal <= MIN_EYE_SPAN {
        return None;
    }

    let ear = (vertical_1 + vertical_2) / (2.0 * horizontal);
    ear.is_finite().then_some(ear)
}

/// Mean EAR of both eyes. `None` if either eye has no signal.
pub fn average_ear(eyes: &EyeLandmarks) -> Option<f32> {
    let left = eye_aspect_ratio(&eyes.left)?;
    let right = eye_aspect_ratio(&eyes.right)?;
    Some((left + right) / 2.0)
}

/// Face box area as a fraction of the frame area, clamped to at most 1.0.
pub fn face_size_ratio(face: &FaceBox, frame: &FrameSize) -> Option<f32> {
    let frame_area = frame.width as f32 * frame.height as f32;
    let face_area = face.width * face.height;

    if frame_area <= 0.0 || !face_area.is_finite() || face_area <= 0.0 {
        return None;
    }

    Some((face_area / frame_area).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Eye with a horizontal span of `width` and both lid gaps of `gap`.
    fn eye(width: f32, gap: f32) -> [Point; 6] {
        let third = width / 3.0;
        let half = gap / 2.0;
        [
            Point::new(0.0, 0.0),
            Point::new(third, -half),
            Point::new(2.0 * third, -half),
            Point::new(width, 0.0),
            Point::new(2.0 * third, half),
            Point::new(third, half),
        ]
    }

    fn face(width: f32, height: f32) -> FaceBox {
        FaceBox {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }

    fn frame(width: u32, height: u32) -> FrameSize {
        FrameSize { width, height }
    }

    #[test]
    fn test_ear_open_eye() {
        // gaps of 3 over a span of 10 -> (3 + 3) / 20
        let ear = eye_aspect_ratio(&eye(10.0, 3.0)).unwrap();
        assert!((ear - 0.3).abs() < 1e-6, "got {ear}");
    }

    #[test]
    fn test_ear_closed_eye_is_small() {
        // gaps of 0.2 over a span of 10 -> 0.02
        let ear = eye_aspect_ratio(&eye(10.0, 0.2)).unwrap();
        assert!((ear - 0.02).abs() < 1e-6, "got {ear}");
        assert!(ear < 0.21);
    }

    #[test]
    fn test_ear_zero_horizontal_span_has_no_signal() {
        let collapsed = [Point::new(5.0, 5.0); 6];
        assert_eq!(eye_aspect_ratio(&collapsed), None);
    }

    #[test]
    fn test_ear_near_zero_horizontal_span_has_no_signal() {
        let mut e = eye(10.0, 3.0);
        e[3] = Point::new(e[0].x + 1e-5, e[0].y);
        assert_eq!(eye_aspect_ratio(&e), None);
    }

    #[test]
    fn test_ear_non_finite_points_have_no_signal() {
        let mut e = eye(10.0, 3.0);
        e[1] = Point::new(f32::NAN, 0.0);
        assert_eq!(eye_aspect_ratio(&e), None);
        e[0] = Point::new(f32::INFINITY, 0.0);
        assert_eq!(eye_aspect_ratio(&e), None);
    }

    #[test]
    fn test_average_ear() {
        let eyes = EyeLandmarks {
            left: eye(10.0, 2.0),
            right: eye(10.0, 4.0),
        };
        let ear = average_ear(&eyes).unwrap();
        assert!((ear - 0.3).abs() < 1e-6, "got {ear}");
    }

    #[test]
    fn test_average_ear_one_degenerate_eye() {
        let eyes = EyeLandmarks {
            left: eye(10.0, 2.0),
            right: [Point::new(0.0, 0.0); 6],
        };
        assert_eq!(average_ear(&eyes), None);
    }

    #[test]
    fn test_face_size_ratio() {
        let ratio = face_size_ratio(&face(160.0, 120.0), &frame(640, 480)).unwrap();
        assert!((ratio - 0.0625).abs() < 1e-6);
    }

    #[test]
    fn test_face_size_ratio_clamped() {
        let ratio = face_size_ratio(&face(1000.0, 1000.0), &frame(640, 480));
        assert_eq!(ratio, Some(1.0));
    }

    #[test]
    fn test_face_size_ratio_degenerate() {
        assert_eq!(face_size_ratio(&face(100.0, 100.0), &frame(0, 480)), None);
        assert_eq!(face_size_ratio(&face(0.0, 100.0), &frame(640, 480)), None);
    }
}
