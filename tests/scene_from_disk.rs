use image::{ImageBuffer, Luma, Rgb, RgbImage};
use nalgebra::Vector3;
use scan_toolkit::core::Pose;
use scan_toolkit::io::{
    load_camera_intrinsics, load_reconstruction_config, load_trajectory, read_rgbd_image,
    read_triangle_mesh, save_trajectory, write_reconstruction, MESH_FILE, REFINED_TRAJECTORY_FILE,
    VISUAL_MESH_FILE,
};
use scan_toolkit::reconstruction::{PosedFrame, Reconstructor};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const WIDTH: u32 = 80;
const HEIGHT: u32 = 60;

/// A wall 0.9 m in front of every camera; depth in millimetres.
fn write_frame(dir: &Path, index: usize) {
    let color = RgbImage::from_fn(WIDTH, HEIGHT, |u, v| {
        if (u / 8 + v / 8) % 2 == 0 {
            Rgb([200, 200, 200])
        } else {
            Rgb([40, 40, 40])
        }
    });
    color.save(dir.join(format!("color_{index:03}.png"))).unwrap();
    let depth: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_pixel(WIDTH, HEIGHT, Luma([900]));
    depth.save(dir.join(format!("depth_{index:03}.png"))).unwrap();
}

#[test]
fn test_scene_reconstructed_from_disk() {
    assert_eq!(scan_toolkit::init_thread_pool(Some(2)).unwrap(), 2);

    let dir = tempfile::tempdir().unwrap();
    let scene = dir.path();
    fs::write(
        scene.join("camera.json"),
        r#"{ "fx": 80.0, "fy": 80.0, "cx": 39.5, "cy": 29.5, "width": 80, "height": 60 }"#,
    )
    .unwrap();
    fs::write(
        scene.join("config.json"),
        r#"{ "tsdf_cubic_size": 1.0, "tsdf_resolution": 128, "sdf_trunc": 0.03,
             "icp_method": "point_to_plane", "alignment_points": 1000 }"#,
    )
    .unwrap();
    let cameras: Vec<Pose> = (0..3)
        .map(|i| Pose::from_translation(Vector3::new(0.02 * i as f64, 0.0, 0.0)))
        .collect();
    save_trajectory(scene.join("trajectory.txt"), &cameras).unwrap();
    for i in 0..cameras.len() {
        write_frame(scene, i);
    }

    let intrinsics = Arc::new(load_camera_intrinsics(scene.join("camera.json")).unwrap());
    let config = load_reconstruction_config(scene.join("config.json")).unwrap();
    let trajectory = load_trajectory(scene.join("trajectory.txt")).unwrap();
    let frames: Vec<PosedFrame> = trajectory
        .iter()
        .enumerate()
        .map(|(i, camera)| {
            let image = read_rgbd_image(
                scene.join(format!("color_{i:03}.png")),
                scene.join(format!("depth_{i:03}.png")),
                config.depth_scale,
                config.max_depth,
            )
            .unwrap();
            PosedFrame::from_camera_pose(Arc::new(image), camera, intrinsics.clone()).unwrap()
        })
        .collect();

    let save_refined = config.save_refined;
    let reconstruction = Reconstructor::new(config, intrinsics).unwrap().run(&frames).unwrap();
    let out = scene.join("reconstruction");
    write_reconstruction(&out, &reconstruction, save_refined).unwrap();

    let mesh = read_triangle_mesh(out.join(MESH_FILE)).unwrap();
    assert!(mesh.num_faces() > 0);
    assert!(mesh.has_colors());
    assert!(mesh.vertices.iter().all(|v| (v.z - 0.9).abs() < 0.01));
    assert!(read_triangle_mesh(out.join(VISUAL_MESH_FILE)).is_ok());
    assert!(!out.join(REFINED_TRAJECTORY_FILE).exists());
}
