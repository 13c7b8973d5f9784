// src/geometry.rs

/// Intersection-over-Union of two [x1, y1, x2, y2] boxes. 0.0 when disjoint
/// or when both boxes are empty.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if intersection <= 0.0 {
        return 0.0;
    }

    let union = (bbox_area(a) + bbox_area(b) - intersection).max(1e-6);
    intersection / union
}

pub fn bbox_area(b: &[f32; 4]) -> f32 {
    (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0)
}

/// Euclidean distance between two points.
pub fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_overlap() {
        let a = [0.0, 0.0, 100.0, 100.0];
        let b = [50.0, 50.0, 150.0, 150.0];
        assert!((iou(&a, &b) - 2500.0 / 17500.0).abs() < 1e-4);
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = [10.0, 10.0, 60.0, 60.0];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &[100.0, 100.0, 200.0, 200.0]), 0.0);
        // Touching edges share no area
        assert_eq!(iou(&a, &[60.0, 10.0, 90.0, 60.0]), 0.0);
    }

    #[test]
    fn test_distance() {
        assert!((distance((0.0, 0.0), (3.0, 4.0)) - 5.0).abs() < 1e-6);
    }
}
