use criterion::{criterion_group, criterion_main, Criterion};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scan_toolkit::core::{CameraIntrinsics, PointCloud, Pose};
use scan_toolkit::reconstruction::{PosedFrame, RgbdImage, TsdfConfig, TsdfVolume};
use scan_toolkit::registration::{
    registration_multi_scale_icp, RegistrationConfig, RegistrationMethod,
};
use std::hint::black_box;
use std::sync::Arc;

/// Noisy samples of a unit-height wave surface, 20 cm across.
fn wave_cloud(count: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let points = (0..count)
        .map(|_| {
            let x = rng.gen_range(-0.1f32..0.1);
            let y = rng.gen_range(-0.1f32..0.1);
            let z = 0.02 * (x * 40.0).sin() * (y * 30.0).cos() + rng.gen_range(-0.0005..0.0005);
            Point3::new(x, y, z)
        })
        .collect();
    PointCloud::new(points)
}

fn slanted_frame(intrinsics: &Arc<CameraIntrinsics>) -> PosedFrame {
    let (w, h) = (intrinsics.width, intrinsics.height);
    let mut depth = Vec::with_capacity((w * h) as usize);
    let mut color = Vec::with_capacity((w * h) as usize);
    for v in 0..h {
        for u in 0..w {
            depth.push(0.8 + 0.2 * u as f32 / w as f32);
            color.push(Vector3::new((u % 256) as u8, (v % 256) as u8, 128));
        }
    }
    let image = RgbdImage::new(w, h, color, depth, 1.3).expect("valid image");
    PosedFrame::new(Arc::new(image), Pose::identity(), intrinsics.clone()).expect("valid frame")
}

fn bench_multi_scale_icp(c: &mut Criterion) {
    let target = wave_cloud(20_000, 1);
    let truth = Pose::new(
        UnitQuaternion::from_euler_angles(0.02, -0.01, 0.03),
        Vector3::new(0.004, -0.002, 0.001),
    );
    let source = wave_cloud(20_000, 2).transformed(&truth.inverse());

    let mut group = c.benchmark_group("Multi-scale ICP");
    group.sample_size(10);
    for method in [
        RegistrationMethod::PointToPoint,
        RegistrationMethod::PointToPlane,
        RegistrationMethod::Generalized,
    ] {
        let config = RegistrationConfig::cascade(method, 0.004, 30);
        group.bench_function(method.to_string(), |b| {
            b.iter(|| {
                registration_multi_scale_icp(
                    black_box(&source),
                    black_box(&target),
                    &Pose::identity(),
                    &config,
                )
            })
        });
    }
    group.finish();
}

fn bench_tsdf(c: &mut Criterion) {
    let intrinsics = Arc::new(CameraIntrinsics::new(320.0, 320.0, 159.5, 119.5, 320, 240));
    let frame = slanted_frame(&intrinsics);
    let config = TsdfConfig::centered(0.8, 256, 0.012, Point3::new(0.0, 0.0, 0.9));

    let mut group = c.benchmark_group("TSDF");
    group.sample_size(10);
    group.bench_function("integrate 320x240", |b| {
        b.iter(|| {
            let mut volume = TsdfVolume::new(config).expect("valid volume");
            volume.integrate(black_box(&frame))
        })
    });

    let mut volume = TsdfVolume::new(config).expect("valid volume");
    volume.integrate(&frame);
    group.bench_function("marching cubes", |b| {
        b.iter(|| black_box(&volume).extract_mesh())
    });
    group.finish();
}

criterion_group!(benches, bench_multi_scale_icp, bench_tsdf);
criterion_main!(benches);
