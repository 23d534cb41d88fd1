#[cfg(test)]
mod tests {
    use crate::registration::{
        evaluate_registration, get_information_matrix_from_point_clouds, registration_icp,
        registration_multi_scale_icp, ConvergenceCriteria, RegistrationConfig,
        RegistrationMethod, ScaleLevel,
    };
    use nalgebra::{Point3, UnitQuaternion, Vector3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use scan_core::{rotation_error_deg, translation_error, Error, PointCloud, Pose};

    const AXES: [f32; 3] = [0.05, 0.035, 0.025];

    /// Random samples on an ellipsoid with analytic outward normals and a
    /// color pattern that varies over the surface.
    fn ellipsoid(count: usize, seed: u64) -> PointCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut points = Vec::with_capacity(count);
        let mut normals = Vec::with_capacity(count);
        let mut colors = Vec::with_capacity(count);
        while points.len() < count {
            let d = Vector3::new(
                rng.gen_range(-1.0f32..1.0),
                rng.gen_range(-1.0f32..1.0),
                rng.gen_range(-1.0f32..1.0),
            );
            let len = d.norm();
            if !(0.1..=1.0).contains(&len) {
                continue;
            }
            let u = d / len;
            let p = Point3::new(u.x * AXES[0], u.y * AXES[1], u.z * AXES[2]);
            let n = Vector3::new(
                p.x / (AXES[0] * AXES[0]),
                p.y / (AXES[1] * AXES[1]),
                p.z / (AXES[2] * AXES[2]),
            )
            .normalize();
            let shade = 0.5 + 0.5 * (p.x * 120.0).sin() * (p.y * 90.0).cos();
            points.push(p);
            normals.push(n);
            colors.push(Point3::new(shade, 1.0 - shade, 0.5));
        }
        PointCloud::new(points)
            .with_normals(normals)
            .unwrap()
            .with_colors(colors)
            .unwrap()
    }

    fn plane_grid(side: usize, spacing: f32) -> PointCloud {
        let mut points = Vec::new();
        for y in 0..side {
            for x in 0..side {
                points.push(Point3::new(x as f32 * spacing, y as f32 * spacing, 0.0));
            }
        }
        let n = points.len();
        PointCloud::new(points)
            .with_normals(vec![Vector3::new(0.0, 0.0, 1.0); n])
            .unwrap()
    }

    fn perturbation(angle_deg: f64, translation: Vector3<f64>) -> Pose {
        let axis = Vector3::new(0.3, -0.5, 0.8).normalize();
        Pose::new(
            UnitQuaternion::from_scaled_axis(axis * angle_deg.to_radians()),
            translation,
        )
    }

    #[test]
    fn test_icp_identical_point_clouds() {
        let cloud = plane_grid(8, 0.1);
        let result = registration_icp(
            &cloud,
            &cloud,
            0.5,
            &Pose::identity(),
            RegistrationMethod::PointToPlane,
            &ConvergenceCriteria::default(),
        )
        .unwrap();

        assert!(result.fitness >= 0.99);
        assert!(result.inlier_rmse < 1e-5);
        assert!(result.transformation.translation().norm() < 1e-9);
    }

    #[test]
    fn test_point_to_point_recovers_translation() {
        let source = ellipsoid(2000, 7);
        let offset = Vector3::new(0.003, -0.002, 0.001);
        let truth = Pose::from_translation(offset);
        let target = source.transformed(&truth);

        let criteria = ConvergenceCriteria {
            relative_fitness: 0.0,
            relative_rmse: 0.0,
            max_iterations: 200,
        };
        let result = registration_icp(
            &source,
            &target,
            0.02,
            &Pose::identity(),
            RegistrationMethod::PointToPoint,
            &criteria,
        )
        .unwrap();

        assert!(translation_error(&result.transformation, &truth) < 5e-4);
        assert!(rotation_error_deg(&result.transformation, &truth) < 0.5);
        assert!(result.fitness > 0.99);
    }

    #[test]
    fn test_self_registration_returns_to_identity() {
        let cloud = ellipsoid(20_000, 5);
        let seed = perturbation(5.0, Vector3::new(0.004, -0.004, 0.004));

        for method in [
            RegistrationMethod::PointToPoint,
            RegistrationMethod::PointToPlane,
            RegistrationMethod::Color,
            RegistrationMethod::Generalized,
        ] {
            let config = RegistrationConfig::new(
                method,
                0.01,
                vec![
                    ScaleLevel::new(0.015, 60),
                    ScaleLevel::new(0.0075, 60),
                    ScaleLevel::new(0.00375, 60),
                ],
            );
            let result = registration_multi_scale_icp(&cloud, &cloud, &seed, &config).unwrap();

            let t_err = translation_error(&result.transformation, &Pose::identity());
            let r_err = rotation_error_deg(&result.transformation, &Pose::identity());
            assert!(t_err < 2e-4, "{method}: translation error {t_err}");
            assert!(r_err < 0.1, "{method}: rotation error {r_err}");
            assert!(result.fitness > 0.99, "{method}: fitness {}", result.fitness);
        }
    }

    #[test]
    fn test_single_scale_point_to_point_recovers_offset() {
        // Object of roughly 40 cm; the offset is exactly one voxel along x.
        let mut source = ellipsoid(20_000, 23);
        for p in &mut source.points {
            p.coords *= 4.0;
        }
        let truth = Pose::from_translation(Vector3::new(0.02, 0.0, 0.0));
        let target = source.transformed(&truth);

        let config = RegistrationConfig::single_scale(RegistrationMethod::PointToPoint, 0.02, 100);
        let result =
            registration_multi_scale_icp(&source, &target, &Pose::identity(), &config).unwrap();

        assert!(translation_error(&result.transformation, &truth) < 2e-4);
        assert!(rotation_error_deg(&result.transformation, &Pose::identity()) < 0.1);
        assert!(result.fitness > 0.99);
    }

    #[test]
    fn test_point_to_plane_multi_scale_recovers_pose() {
        let source = ellipsoid(20_000, 11);
        let truth = perturbation(2.0, Vector3::new(0.004, -0.003, 0.002));
        let target = source.transformed(&truth);

        let config = RegistrationConfig::new(
            RegistrationMethod::PointToPlane,
            0.01,
            vec![ScaleLevel::new(0.004, 30), ScaleLevel::new(0.002, 30)],
        );
        let result =
            registration_multi_scale_icp(&source, &target, &Pose::identity(), &config).unwrap();

        assert!(translation_error(&result.transformation, &truth) < 1e-3);
        assert!(rotation_error_deg(&result.transformation, &truth) < 0.5);
        assert!(result.fitness > 0.9);
        assert_eq!(result.information_voxel_size, 0.002);
        assert!(result.num_iterations >= 2);
    }

    #[test]
    fn test_generalized_multi_scale_recovers_pose() {
        let source = ellipsoid(20_000, 13);
        let truth = perturbation(-1.5, Vector3::new(-0.003, 0.002, 0.003));
        let target = source.transformed(&truth);

        let config = RegistrationConfig::new(
            RegistrationMethod::Generalized,
            0.01,
            vec![ScaleLevel::new(0.004, 40), ScaleLevel::new(0.002, 40)],
        );
        let result =
            registration_multi_scale_icp(&source, &target, &Pose::identity(), &config).unwrap();

        assert!(translation_error(&result.transformation, &truth) < 1e-3);
        assert!(rotation_error_deg(&result.transformation, &truth) < 1.0);
    }

    #[test]
    fn test_color_multi_scale_improves_estimate() {
        let source = ellipsoid(20_000, 17);
        let truth = perturbation(1.0, Vector3::new(0.0015, -0.001, 0.001));
        let target = source.transformed(&truth);

        let config = RegistrationConfig::new(
            RegistrationMethod::Color,
            0.004,
            vec![ScaleLevel::new(0.008, 50), ScaleLevel::new(0.004, 30)],
        );
        let result =
            registration_multi_scale_icp(&source, &target, &Pose::identity(), &config).unwrap();

        let initial = translation_error(&Pose::identity(), &truth);
        assert!(translation_error(&result.transformation, &truth) < initial);
        assert!(result.fitness > 0.5);
    }

    #[test]
    fn test_color_requires_colors() {
        let cloud = plane_grid(5, 0.01);
        let config = RegistrationConfig::single_scale(RegistrationMethod::Color, 0.01, 10);
        let err = registration_multi_scale_icp(&cloud, &cloud, &Pose::identity(), &config)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let cloud = plane_grid(5, 0.01);
        let config = RegistrationConfig::new(RegistrationMethod::PointToPoint, 0.01, vec![]);
        let err = registration_multi_scale_icp(&cloud, &cloud, &Pose::identity(), &config)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_empty_cloud_is_low_confidence() {
        let empty = PointCloud::new(Vec::new());
        let target = plane_grid(5, 0.01);
        let init = Pose::from_translation(Vector3::new(0.1, 0.0, 0.0));
        let config = RegistrationConfig::single_scale(RegistrationMethod::PointToPlane, 0.01, 10);

        let result = registration_multi_scale_icp(&empty, &target, &init, &config).unwrap();
        assert_eq!(result.fitness, 0.0);
        assert!(result.is_low_confidence(0.1));
        assert_eq!(result.information, nalgebra::Matrix6::zeros());
        assert_eq!(result.transformation, init);
    }

    #[test]
    fn test_zero_normals_yield_no_correspondences() {
        let source = plane_grid(6, 0.01);
        let n = source.len();
        let mut target = source.clone();
        target.normals = Some(vec![Vector3::zeros(); n]);

        let result = registration_icp(
            &source,
            &target,
            0.05,
            &Pose::identity(),
            RegistrationMethod::PointToPlane,
            &ConvergenceCriteria::default(),
        )
        .unwrap();
        assert_eq!(result.fitness, 0.0);
        assert_eq!(result.transformation, Pose::identity());
    }

    #[test]
    fn test_point_to_plane_requires_target_normals() {
        let source = PointCloud::new(vec![Point3::new(0.0, 0.0, 0.0)]);
        let target = PointCloud::new(vec![Point3::new(0.0, 0.0, 0.0)]);
        let err = registration_icp(
            &source,
            &target,
            0.1,
            &Pose::identity(),
            RegistrationMethod::PointToPlane,
            &ConvergenceCriteria::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_very_distant_point_clouds() {
        let source = PointCloud::new(vec![Point3::new(0.0, 0.0, 0.0)]);
        let target = PointCloud::new(vec![Point3::new(100.0, 100.0, 100.0)]);
        let result = registration_icp(
            &source,
            &target,
            1.0,
            &Pose::identity(),
            RegistrationMethod::PointToPoint,
            &ConvergenceCriteria::default(),
        )
        .unwrap();
        assert_eq!(result.fitness, 0.0);
        assert_eq!(result.num_iterations, 0);
    }

    #[test]
    fn test_information_matrix_single_point() {
        let cloud = PointCloud::new(vec![Point3::new(1.0, 2.0, 3.0)]);
        let info = get_information_matrix_from_point_clouds(&cloud, &cloud, 0.1, &Pose::identity());

        // Rotation block: Σ gᵢgᵢᵀ over the three rows.
        assert!((info[(0, 0)] - 13.0).abs() < 1e-9);
        assert!((info[(1, 1)] - 10.0).abs() < 1e-9);
        assert!((info[(2, 2)] - 5.0).abs() < 1e-9);
        // Translation block is the identity for one point.
        for i in 3..6 {
            assert!((info[(i, i)] - 1.0).abs() < 1e-9);
        }
        assert!((info - info.transpose()).norm() < 1e-12);
    }

    #[test]
    fn test_information_matrix_grows_with_overlap() {
        let cloud = plane_grid(10, 0.01);
        let full = get_information_matrix_from_point_clouds(&cloud, &cloud, 0.005, &Pose::identity());
        let shifted = Pose::from_translation(Vector3::new(0.053, 0.0, 0.0));
        let partial = get_information_matrix_from_point_clouds(&cloud, &cloud, 0.005, &shifted);

        // One correspondence per matched point contributes 1 to each translation diagonal.
        assert!((full[(5, 5)] - 100.0).abs() < 1e-9);
        assert!(partial[(5, 5)] < full[(5, 5)]);
        let eigen = full.symmetric_eigen();
        assert!(eigen.eigenvalues.iter().all(|&v| v > -1e-9));
    }

    #[test]
    fn test_evaluate_registration() {
        let cloud = plane_grid(6, 0.01);
        let (fitness, rmse) = evaluate_registration(&cloud, &cloud, 0.005, &Pose::identity());
        assert_eq!(fitness, 1.0);
        assert!(rmse < 1e-9);

        let far = Pose::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let (fitness, _) = evaluate_registration(&cloud, &cloud, 0.005, &far);
        assert_eq!(fitness, 0.0);
    }
}
