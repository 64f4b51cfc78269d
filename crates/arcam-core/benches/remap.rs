use arcam_core::{
    FrameFormat, FrameImage, ImageSize, Interpolation, MapRequest, NumericBackend, PixelFormat,
    ReferenceBackend, RectificationKind,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::Matrix3;

fn gradient(format: FrameFormat) -> FrameImage {
    let mut img = FrameImage::new(format);
    let bpp = format.pixel_format.bytes_per_pixel();
    for y in 0..format.height {
        for x in 0..format.width {
            let i = (y * format.width + x) * bpp;
            for c in 0..bpp {
                img.data[i + c] = ((x + 2 * y + 40 * c) & 0xff) as u8;
            }
        }
    }
    img
}

fn camera(size: ImageSize, f: f64) -> Matrix3<f64> {
    Matrix3::new(
        f,
        0.0,
        size.width as f64 * 0.5,
        0.0,
        f,
        size.height as f64 * 0.5,
        0.0,
        0.0,
        1.0,
    )
}

fn bench_maps(c: &mut Criterion) {
    let size = ImageSize::new(640, 480);
    let k = camera(size, 500.0);
    let pinhole = [-0.28, 0.09, 0.001, -0.0005, 0.0];
    let omni = [-0.05, 0.01, 0.0, 0.0];

    c.bench_function("pinhole_maps_640x480", |b| {
        b.iter(|| {
            let req = MapRequest::undistort(k, &pinhole, size);
            black_box(ReferenceBackend.init_undistort_rectify_map(black_box(&req)))
        })
    });
    c.bench_function("omnidir_cylindrical_maps_640x480", |b| {
        b.iter(|| {
            let req = MapRequest::undistort(k, &omni, size);
            black_box(ReferenceBackend.omnidir_init_undistort_rectify_map(
                black_box(&req),
                0.9,
                RectificationKind::Cylindrical,
            ))
        })
    });
}

fn bench_remap(c: &mut Criterion) {
    let format = FrameFormat::new(640, 480, PixelFormat::Rgb24);
    let src = gradient(format);
    let dist = [-0.28, 0.09, 0.001, -0.0005, 0.0];
    let Ok(maps) = ReferenceBackend.init_undistort_rectify_map(&MapRequest::undistort(
        camera(format.size(), 500.0),
        &dist,
        format.size(),
    )) else {
        panic!("deterministic fixture should always produce maps");
    };
    let mut dst = FrameImage::new(format);

    for (name, interpolation) in [
        ("remap_rgb_640x480_nearest", Interpolation::Nearest),
        ("remap_rgb_640x480_bilinear", Interpolation::Bilinear),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| {
                ReferenceBackend
                    .remap(black_box(&src.view()), &maps, interpolation, &mut dst)
                    .expect("fixture formats match")
            })
        });
    }
}

criterion_group!(remap, bench_maps, bench_remap);
criterion_main!(remap);
