use nalgebra::{Point3, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use scan_3d::mesh::processing::*;
use scan_3d::*;
use scan_core::{rotation_error_deg, translation_error, CameraIntrinsics, Error, Pose};
use scan_registration::RegistrationMethod;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pose(axis: Vector3<f64>, angle_deg: f64, translation: Vector3<f64>) -> Pose {
    let rotation =
        UnitQuaternion::from_axis_angle(&nalgebra::Unit::new_normalize(axis), angle_deg.to_radians());
    Pose::new(rotation, translation)
}

struct Sphere {
    center: Vector3<f64>,
    radius: f64,
    color: Vector3<u8>,
}

/// Table plane at z = 0.9 with two balls in front of it, as seen by a camera
/// looking down +z.
fn scene_spheres() -> Vec<Sphere> {
    vec![
        Sphere {
            center: Vector3::new(-0.08, 0.0, 0.75),
            radius: 0.06,
            color: Vector3::new(220, 40, 40),
        },
        Sphere {
            center: Vector3::new(0.07, 0.03, 0.8),
            radius: 0.05,
            color: Vector3::new(40, 40, 220),
        },
    ]
}

const TABLE_Z: f64 = 0.9;

fn intrinsics() -> Arc<CameraIntrinsics> {
    Arc::new(CameraIntrinsics::new(80.0, 80.0, 39.5, 29.5, 80, 60))
}

/// Ray casts the synthetic scene into an RGB-D image.
fn render(camera_to_world: &Pose, intrinsics: &CameraIntrinsics, with_spheres: bool) -> RgbdImage {
    let (w, h) = (intrinsics.width, intrinsics.height);
    let origin = camera_to_world.translation();
    let rotation = camera_to_world.rotation_matrix();
    let spheres = if with_spheres { scene_spheres() } else { Vec::new() };

    let mut color = Vec::with_capacity((w * h) as usize);
    let mut depth = Vec::with_capacity((w * h) as usize);
    for v in 0..h {
        for u in 0..w {
            let ray_camera = Vector3::new(
                (u as f64 - intrinsics.cx) / intrinsics.fx,
                (v as f64 - intrinsics.cy) / intrinsics.fy,
                1.0,
            );
            let dir = rotation * ray_camera;

            // Camera depth equals the ray parameter since the camera-frame ray has z = 1.
            let mut best = f64::INFINITY;
            let mut best_color = Vector3::new(0u8, 0, 0);
            if dir.z.abs() > 1e-9 {
                let t = (TABLE_Z - origin.z) / dir.z;
                if t > 0.0 {
                    let hit = origin + dir * t;
                    let checker = ((hit.x * 20.0).floor() + (hit.y * 20.0).floor()) as i64;
                    best = t;
                    best_color = if checker.rem_euclid(2) == 0 {
                        Vector3::new(200, 200, 200)
                    } else {
                        Vector3::new(60, 90, 60)
                    };
                }
            }
            for s in &spheres {
                let oc = origin - s.center;
                let a = dir.norm_squared();
                let b = 2.0 * oc.dot(&dir);
                let c = oc.norm_squared() - s.radius * s.radius;
                let disc = b * b - 4.0 * a * c;
                if disc < 0.0 {
                    continue;
                }
                let t = (-b - disc.sqrt()) / (2.0 * a);
                if t > 0.0 && t < best {
                    best = t;
                    best_color = s.color;
                }
            }

            depth.push(if best.is_finite() { best as f32 } else { 0.0 });
            color.push(best_color);
        }
    }
    RgbdImage::new(w, h, color, depth, 3.0).unwrap()
}

fn camera_at(x: f64, y: f64) -> Pose {
    Pose::from_translation(Vector3::new(x, y, 0.0))
}

fn frames(cameras: &[Pose], with_spheres: bool) -> Vec<PosedFrame> {
    let intrinsics = intrinsics();
    cameras
        .iter()
        .map(|c| {
            let image = render(c, &intrinsics, with_spheres);
            PosedFrame::from_camera_pose(Arc::new(image), c, Arc::clone(&intrinsics)).unwrap()
        })
        .collect()
}

/// A flat `nx × ny` quad grid, two triangles per quad.
fn grid(nx: usize, ny: usize, offset: Vector3<f32>, spacing: f32) -> TriangleMesh {
    let mut vertices = Vec::new();
    for j in 0..=ny {
        for i in 0..=nx {
            vertices.push(Point3::from(
                offset + Vector3::new(i as f32 * spacing, j as f32 * spacing, 0.0),
            ));
        }
    }
    let mut faces = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            let a = j * (nx + 1) + i;
            let b = a + 1;
            let c = a + nx + 1;
            let d = c + 1;
            faces.push([a, b, d]);
            faces.push([a, d, c]);
        }
    }
    TriangleMesh::with_vertices_and_faces(vertices, faces)
}

#[test]
fn test_fused_plane_lies_within_truncation() {
    init_tracing();
    let cameras: Vec<Pose> = (0..5).map(|i| camera_at(-0.1 + 0.05 * i as f64, 0.0)).collect();
    let frames = frames(&cameras, false);

    let trunc = 0.05;
    let config = TsdfConfig::centered(2.0, 128, trunc, Point3::new(0.0, 0.0, 0.8));
    let mut volume = TsdfVolume::new(config).unwrap();
    for frame in &frames {
        volume.integrate(frame);
    }
    assert_eq!(volume.num_frames(), 5);

    let mesh = volume.extract_mesh();
    assert!(mesh.num_faces() > 100);
    for v in &mesh.vertices {
        assert!((v.z - TABLE_Z as f32).abs() <= trunc);
    }
    assert!(mesh.has_colors());
    assert!(mesh.has_normals());
}

#[test]
fn test_integration_order_does_not_matter() {
    let cameras: Vec<Pose> = (0..3).map(|i| camera_at(0.04 * i as f64, 0.02)).collect();
    let frames = frames(&cameras, true);
    let config = TsdfConfig::centered(1.0, 64, 0.04, Point3::new(0.0, 0.0, 0.8));

    let mut forward = TsdfVolume::new(config).unwrap();
    frames.iter().for_each(|f| {
        forward.integrate(f);
    });
    let mut backward = TsdfVolume::new(config).unwrap();
    frames.iter().rev().for_each(|f| {
        backward.integrate(f);
    });

    let a = forward.extract_mesh();
    let b = backward.extract_mesh();
    assert_eq!(a.num_faces(), b.num_faces());
    assert_eq!(a.num_vertices(), b.num_vertices());
    for (p, q) in a.vertices.iter().zip(&b.vertices) {
        assert!((p - q).norm() < 1e-4);
    }
}

#[test]
fn test_simplification_respects_budget_and_extent() {
    let mesh = TriangleMesh::create_box(0.2, 0.1, 0.05, 8);
    assert_eq!(mesh.num_faces(), 768);
    let (lo, hi) = mesh.bounds().unwrap();

    for target in [400, 100] {
        let simplified = simplify_quadric_decimation(&mesh, target);
        assert!(simplified.num_faces() <= target);
        assert!(simplified.has_normals());
        let (slo, shi) = simplified.bounds().unwrap();
        assert!((slo - lo).norm() < 1e-3);
        assert!((shi - hi).norm() < 1e-3);
    }
}

#[test]
fn test_largest_cluster_drops_fragments() {
    let mut mesh = grid(25, 20, Vector3::zeros(), 0.01);
    assert_eq!(mesh.num_faces(), 1000);
    mesh.merge(&grid(5, 1, Vector3::new(1.0, 0.0, 0.0), 0.01));
    mesh.merge(&grid(2, 2, Vector3::new(0.0, 1.0, 0.0), 0.01));
    mesh.merge(&grid(1, 1, Vector3::new(-1.0, 0.0, 0.5), 0.01));
    mesh.merge(&TriangleMesh::create_plane(0.05, 0.05, 2).transformed(&Pose::from_translation(
        Vector3::new(0.0, -1.0, 0.0),
    )));

    let clusters = cluster_connected_triangles(&mesh);
    assert_eq!(clusters.cluster_n_triangles, vec![1000, 10, 8, 2, 8]);
    assert!((clusters.cluster_area[0] - 0.05).abs() < 1e-6);

    let removed = keep_largest_cluster(&mut mesh);
    assert_eq!(removed, 28);
    assert_eq!(mesh.num_faces(), 1000);
    assert_eq!(mesh.num_vertices(), 26 * 21);
}

#[test]
fn test_auto_align_recovers_placed_object() {
    init_tracing();
    let object = TriangleMesh::create_box(0.08, 0.05, 0.03, 4);
    let truth = pose(Vector3::new(0.0, 0.0, 1.0), 30.0, Vector3::new(0.02, -0.03, 0.0));

    let mut scene = TriangleMesh::create_plane(0.3, 0.3, 4);
    scene.merge(&object.transformed(&truth));

    // 4° about the box center plus a 4 mm shift, expressed in the object frame.
    let center = Vector3::new(0.04, 0.025, 0.015);
    let perturbation = Pose::from_translation(center + Vector3::new(0.003, -0.002, 0.002))
        * pose(Vector3::new(1.0, 2.0, 0.5), 4.0, Vector3::zeros())
        * Pose::from_translation(-center);
    let seed = truth * perturbation;
    assert!(rotation_error_deg(&seed, &truth) > 3.9);

    let config = AutoAlignConfig::default();
    let result = auto_align(&object, SceneSurface::Mesh(&scene), &seed, &config).unwrap();
    assert!(rotation_error_deg(&result.pose, &truth) < 1.0);
    assert!(translation_error(&result.pose, &truth) < 0.002);
    assert!(result.fitness > 0.5);
    assert_eq!(result.fine.information_voxel_size, 0.001);
    assert!(result.information[(3, 3)] > 0.0);
}

#[test]
fn test_auto_align_against_alignment_cloud() {
    let object = TriangleMesh::create_sphere(0.04, 24);
    let truth = Pose::from_translation(Vector3::new(0.0, 0.0, 0.04));
    let mut scene = TriangleMesh::create_plane(0.2, 0.2, 2);
    scene.merge(&object.transformed(&truth));
    let mut rng = StdRng::seed_from_u64(11);
    let cloud = sample_points_uniform_and_poisson(&scene, 20_000, 10_000, &mut rng);

    let seed = pose(Vector3::z(), 0.0, Vector3::new(0.002, 0.001, 0.043));
    let config = AutoAlignConfig {
        uniform_points: 2000,
        poisson_points: 1000,
        ..AutoAlignConfig::default()
    };
    let result = auto_align(&object, SceneSurface::Cloud(&cloud), &seed, &config).unwrap();
    assert!(translation_error(&result.pose, &truth) < 0.002);
    assert!(result.fitness > 0.5);
    assert!(!result.fine.is_low_confidence(0.5));
}

#[test]
fn test_refinement_corrects_perturbed_frame() {
    init_tracing();
    let cameras = [camera_at(0.0, 0.0), camera_at(0.02, 0.0)];
    let mut frames = frames(&cameras, true);

    let error = pose(Vector3::new(0.3, 1.0, 0.2), 0.5, Vector3::new(0.004, -0.003, 0.002));
    let wrong_camera = cameras[1] * error;
    frames[1] = frames[1].with_extrinsic(wrong_camera.inverse());

    let refined = refine_trajectory(&frames, RegistrationMethod::PointToPlane, 0.01).unwrap();
    assert_eq!(refined.frames.len(), 2);
    assert_eq!(refined.pairs.len(), 1);
    assert_eq!(refined.pairs[0].index, 1);
    assert_eq!(refined.frames[0].extrinsic, frames[0].extrinsic);

    let poses = refined.camera_poses();
    assert!(translation_error(&poses[1], &cameras[1]) < 0.003);
    assert!(rotation_error_deg(&poses[1], &cameras[1]) < 1.0);
    assert!(translation_error(&wrong_camera, &cameras[1]) > 0.005);
}

#[test]
fn test_refinement_rejects_bad_voxel() {
    let frames = frames(&[camera_at(0.0, 0.0)], true);
    let err = refine_trajectory(&frames, RegistrationMethod::Color, 0.0).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_pipeline_produces_three_artifacts() {
    init_tracing();
    let cameras: Vec<Pose> = (0..5).map(|i| camera_at(-0.04 + 0.02 * i as f64, 0.0)).collect();
    let frames = frames(&cameras, true);

    let config = ReconstructionConfig {
        tsdf_cubic_size: 1.0,
        tsdf_resolution: 128,
        sdf_trunc: 0.03,
        icp_method: "point_to_plane".into(),
        icp_refinement: true,
        voxel_size: 0.01,
        simplify: true,
        triangles: 2000,
        cluster: true,
        alignment_points: 4000,
        ..ReconstructionConfig::default()
    };
    let reconstructor = Reconstructor::new(config, intrinsics()).unwrap();
    let reconstruction = reconstructor.run(&frames).unwrap();

    assert!(reconstruction.mesh.num_faces() > 2000);
    assert!(reconstruction.visual_mesh.num_faces() <= 2000);
    assert!(reconstruction.visual_mesh.num_faces() > 0);
    assert_eq!(reconstruction.alignment_cloud.len(), 4000);
    assert_eq!(reconstruction.camera_poses.len(), 5);
    let refinement = reconstruction.refinement.as_ref().unwrap();
    assert_eq!(refinement.pairs.len(), 4);
    for (refined, truth) in reconstruction.camera_poses.iter().zip(&cameras) {
        assert!(translation_error(refined, truth) < 0.005);
    }

    // Only the table survives the cluster filter; the balls float in front of it.
    let table = TABLE_Z as f32;
    let near_table = reconstruction
        .mesh
        .vertices
        .iter()
        .filter(|v| (v.z - table).abs() < 0.03)
        .count();
    assert_eq!(near_table, reconstruction.mesh.num_vertices());
}

#[test]
fn test_unknown_method_is_rejected_when_run() {
    let config = ReconstructionConfig {
        icp_method: "symmetric".into(),
        ..ReconstructionConfig::default()
    };
    let reconstructor = Reconstructor::new(config, intrinsics()).unwrap();
    let frames = frames(&[camera_at(0.0, 0.0)], false);
    let err = reconstructor.run(&frames).unwrap_err();
    assert!(matches!(err, Error::UnsupportedMethod(_)));
}

#[test]
fn test_pipeline_rejects_foreign_intrinsics() {
    let other = Arc::new(CameraIntrinsics::new(90.0, 90.0, 39.5, 29.5, 80, 60));
    let reconstructor = Reconstructor::new(ReconstructionConfig::default(), other).unwrap();
    let frames = frames(&[camera_at(0.0, 0.0)], false);
    let err = reconstructor.run(&frames).unwrap_err();
    assert!(matches!(err, Error::InvalidIntrinsics(_)));
}

#[test]
fn test_config_defaults_fill_missing_keys() {
    let config: ReconstructionConfig =
        serde_json::from_str(r#"{ "sdf_trunc": 0.01, "cluster": true }"#).unwrap();
    assert_eq!(config.sdf_trunc, 0.01);
    assert!(config.cluster);
    assert_eq!(config.tsdf_resolution, 512);
    assert!(!config.simplify);
    assert_eq!(config.triangles, 1_000_000);
    assert_eq!(config.icp_method, "color");
    assert_eq!(config.method().unwrap(), RegistrationMethod::Color);
}
