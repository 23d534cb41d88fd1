use nalgebra::{Point3, UnitQuaternion, Vector3};
use scan_core::point_cloud::PointCloud;
use scan_core::Pose;

#[test]
fn test_point_cloud_result_handling() {
    let points = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)];
    let cloud = PointCloud::new(points);

    let colors = vec![Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)];
    assert!(cloud.clone().with_colors(colors).is_ok());

    let bad_colors = vec![Point3::new(1.0, 0.0, 0.0)];
    let err = cloud.clone().with_colors(bad_colors).unwrap_err();
    assert!(err.to_string().contains("Color count"));

    let bad_normals = vec![Vector3::new(0.0, 0.0, 1.0)];
    let err = cloud.with_normals(bad_normals).unwrap_err();
    assert!(err.to_string().contains("Normal count"));
}

#[test]
fn test_transformed_moves_points_and_rotates_normals() {
    let cloud = PointCloud::new(vec![Point3::new(1.0f32, 0.0, 0.0)])
        .with_normals(vec![Vector3::new(1.0, 0.0, 0.0)])
        .unwrap();
    let pose = Pose::new(
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2),
        Vector3::new(0.0, 0.0, 2.0),
    );

    let moved = cloud.transformed(&pose);
    assert!((moved.points[0] - Point3::new(0.0, 1.0, 2.0)).norm() < 1e-6);
    let n = moved.normals.as_ref().unwrap()[0];
    assert!((n - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-6);
}

#[test]
fn test_append_drops_attributes_missing_on_one_side() {
    let mut a = PointCloud::new(vec![Point3::new(0.0f32, 0.0, 0.0)])
        .with_colors(vec![Point3::new(1.0, 1.0, 1.0)])
        .unwrap();
    let b = PointCloud::new(vec![Point3::new(1.0f32, 0.0, 0.0)]);
    a.append(&b);
    assert_eq!(a.len(), 2);
    assert!(!a.has_colors());

    let mut empty = PointCloud::<f32>::default();
    let colored = PointCloud::new(vec![Point3::new(0.0f32, 0.0, 0.0)])
        .with_colors(vec![Point3::new(0.5, 0.5, 0.5)])
        .unwrap();
    empty.append(&colored);
    assert!(empty.has_colors());
}

#[test]
fn test_select_and_bounds() {
    let cloud = PointCloud::new(vec![
        Point3::new(0.0f32, 0.0, 0.0),
        Point3::new(2.0, -1.0, 0.5),
        Point3::new(1.0, 3.0, -0.5),
    ]);
    let picked = cloud.select(&[2, 0]);
    assert_eq!(picked.points[0], Point3::new(1.0, 3.0, -0.5));

    let (lo, hi) = cloud.bounds().unwrap();
    assert_eq!(lo, Point3::new(0.0, -1.0, -0.5));
    assert_eq!(hi, Point3::new(2.0, 3.0, 0.5));
    assert!(PointCloud::<f32>::default().bounds().is_none());
}
