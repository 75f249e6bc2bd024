/// 叶子剔除与静态模型链接基准测试

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{Vec3, Vec4};
use worldbrush::config::RendererConfig;
use worldbrush::render::gpu_driven::SoftwareBackend;
use worldbrush::render::{link_static_models, link_static_models_simd, FrameParams, Frustum, ShaderPrograms, WorldRenderer};
use worldbrush::world::{
    Aabb, BrushModel, BrushTexture, BrushVertex, Leaf, LeafContents, Surface, TexType, VisBitmap, WorldModel,
};
use worldbrush_simd::{cull_box_8, cull_box_8_scalar, SoaAabb8};

/// 沿视线方向排开的叶子网格，每个叶子一个表面和一个静态实体
fn grid_world(leaf_count: u32) -> WorldModel {
    let leaves = (0..leaf_count)
        .map(|i| {
            let x = 16.0 + (i / 16) as f32 * 32.0;
            let y = ((i % 16) as f32 - 8.0) * 32.0;
            Leaf {
                bounds: Aabb::new(Vec3::new(x, y, -16.0), Vec3::new(x + 24.0, y + 24.0, 16.0)),
                contents: LeafContents::Empty,
                first_mark_surface: i,
                num_mark_surfaces: 1,
                static_entities: vec![i],
            }
        })
        .collect();
    let surfaces = (0..leaf_count)
        .map(|i| Surface::new(Vec4::new(-1.0, 0.0, 0.0, -8.0), i % 4, i * 4, 4))
        .collect();
    let textures = (0..4).map(|_| BrushTexture::new(TexType::Default, None)).collect();
    WorldModel::new(
        leaves,
        (0..leaf_count).collect(),
        surfaces,
        vec![BrushModel::new(textures, 0..leaf_count)],
        vec![BrushVertex::default(); (leaf_count * 4) as usize],
    )
    .unwrap()
}

fn frustum() -> Frustum {
    Frustum::from_view_vectors(Vec3::ZERO, Vec3::X, Vec3::NEG_Y, Vec3::Z, 90.0, 73.0)
}

/// 每隔一个叶子可见
fn checkerboard_vis(leaf_count: u32) -> VisBitmap {
    let mut vis = VisBitmap::empty(leaf_count);
    for leaf in (0..leaf_count).step_by(2) {
        vis.set(leaf);
    }
    vis
}

fn bench_cull_box_8(c: &mut Criterion) {
    let mut group = c.benchmark_group("cull_box_8");

    let boxes: Vec<(Vec3, Vec3)> = (0..8)
        .map(|i| {
            let mins = Vec3::new(i as f32 * 40.0 - 100.0, -20.0, -20.0);
            (mins, mins + Vec3::splat(30.0))
        })
        .collect();
    let soa = SoaAabb8::pack(&boxes)[0];
    let planes = frustum().to_cull_planes();

    group.bench_function("simd", |bencher| {
        bencher.iter(|| black_box(cull_box_8(black_box(&soa), &planes, 0xff)));
    });

    group.bench_function("scalar", |bencher| {
        bencher.iter(|| black_box(cull_box_8_scalar(black_box(&soa), &planes, 0xff)));
    });

    group.finish();
}

fn bench_static_link(c: &mut Criterion) {
    let mut group = c.benchmark_group("static_link");
    let frustum = frustum();

    for leaf_count in [256u32, 4096, 32768] {
        let world = grid_world(leaf_count);
        let vis = checkerboard_vis(leaf_count);
        let mut out = Vec::with_capacity(leaf_count as usize);

        group.bench_with_input(BenchmarkId::new("simd", leaf_count), &leaf_count, |bencher, _| {
            bencher.iter(|| {
                out.clear();
                link_static_models_simd(&world, &vis, &frustum, &mut out);
                black_box(out.len())
            });
        });

        group.bench_with_input(BenchmarkId::new("scalar", leaf_count), &leaf_count, |bencher, _| {
            bencher.iter(|| {
                out.clear();
                link_static_models(&world, &vis, &frustum, &mut out);
                black_box(out.len())
            });
        });
    }

    group.finish();
}

fn bench_software_mark(c: &mut Criterion) {
    let mut group = c.benchmark_group("software_mark");

    for leaf_count in [256u32, 4096] {
        let mut renderer = WorldRenderer::new(
            SoftwareBackend::new(),
            RendererConfig::default(),
            ShaderPrograms::uniform(Default::default()),
        )
        .unwrap();
        renderer.load_world(grid_world(leaf_count)).unwrap();
        let vis = checkerboard_vis(leaf_count);
        let params = FrameParams::new(frustum(), Vec3::ZERO);

        group.bench_with_input(BenchmarkId::from_parameter(leaf_count), &leaf_count, |bencher, _| {
            bencher.iter(|| {
                renderer.begin_frame(params).unwrap();
                renderer.mark_surfaces(&vis).unwrap();
                renderer.end_frame().unwrap();
                renderer.backend_mut().take_events();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cull_box_8, bench_static_link, bench_software_mark);
criterion_main!(benches);
