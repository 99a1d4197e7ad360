use nalgebra::Point3;
use nalgebra::UnitQuaternion;

/// One per-frame pose sample of a tracked tool.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationData {
    pub name: String,
    pub position: Point3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub data_valid: bool,
    pub timestamp_ms: f64,
}

impl NavigationData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            position: Point3::origin(),
            orientation: UnitQuaternion::identity(),
            data_valid: false,
            timestamp_ms: 0.0,
        }
    }

    pub fn set_pose(
        &mut self,
        position: Point3<f64>,
        orientation: UnitQuaternion<f64>,
        timestamp_ms: f64,
    ) {
        self.position = position;
        self.orientation = orientation;
        self.timestamp_ms = timestamp_ms;
        self.data_valid = true;
    }

    pub fn invalidate(&mut self) {
        self.data_valid = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_data_is_invalid_until_a_pose_is_set() {
        let mut data = NavigationData::new("probe");
        assert!(!data.data_valid);

        data.set_pose(
            Point3::new(1.0, 2.0, 3.0),
            UnitQuaternion::identity(),
            42.0,
        );
        assert!(data.data_valid);
        assert_eq!(data.position, Point3::new(1.0, 2.0, 3.0));
        assert_eq!(data.timestamp_ms, 42.0);

        data.invalidate();
        assert!(!data.data_valid);
    }
}
