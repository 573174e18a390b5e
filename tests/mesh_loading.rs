//! Mesh loading integration tests.
//!
//! Loads procedural scenes and small glTF files written to temporary
//! directories, then checks the uploaded buffers, bindless registration and
//! material uniforms on the dummy device.

mod common;

use std::path::Path;

use glam::Vec3;
use rstest::rstest;

use common::{
    TestContext, grid_primitive, scene_of, textured_material, triangle_primitive, write_png,
    write_triangle_gltf,
};
use meshlet_renderer::backend::{GpuError, ImageFormat};
use meshlet_renderer::resources::{
    ABSENT_INDEX, LoadError, MAX_MESHLET_TRIANGLES, MAX_MESHLET_VERTICES, MaterialUniform, Meshlet,
};
use meshlet_renderer::{GraphConfig, LoaderConfig, RendererConfig};

fn loader_config(parallel: bool) -> RendererConfig {
    RendererConfig {
        loader: LoaderConfig {
            parallel_texture_loading: parallel,
            ..Default::default()
        },
        ..RendererConfig::new(64, 64)
    }
}

fn occupied_slots(ctx: &TestContext, heap: meshlet_renderer::backend::DescriptorHeapHandle) -> usize {
    ctx.gpu
        .heap(heap)
        .unwrap()
        .slots
        .iter()
        .filter(|slot| slot.is_some())
        .count()
}

// ============================================================================
// Materials
// ============================================================================

#[rstest]
#[case::parallel(true)]
#[case::sequential(false)]
fn test_textured_material_registers_bindless_slots(#[case] parallel: bool) {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "albedo.png", 16, 8);
    write_png(dir.path(), "normal.png", 4, 4);
    write_png(dir.path(), "mr.png", 2, 2);

    let mut ctx = TestContext::with_config(loader_config(parallel));
    let scene = scene_of(
        vec![triangle_primitive(Some(0))],
        vec![textured_material(Some("albedo.png"), Some("normal.png"), Some("mr.png"))],
    );
    let mesh = ctx.loader.load_scene(&mut ctx.gpu, &scene, dir.path()).unwrap();

    assert_eq!(mesh.materials.len(), 1);
    assert_eq!(mesh.primitives[0].material, Some(0));
    let material = &mesh.materials[0];

    let albedo = material.albedo.unwrap();
    let normal = material.normal.unwrap();
    let metallic_roughness = material.metallic_roughness.unwrap();
    assert_eq!(
        (albedo.bindless_index, normal.bindless_index, metallic_roughness.bindless_index),
        (0, 1, 2)
    );

    let albedo_image = ctx.gpu.image(albedo.image).unwrap();
    assert_eq!((albedo_image.width, albedo_image.height), (16, 8));
    assert_eq!(albedo_image.mip_levels, 5);
    assert_eq!(albedo_image.format, ImageFormat::Rgba8UnormSrgb);

    let normal_image = ctx.gpu.image(normal.image).unwrap();
    assert_eq!(normal_image.mip_levels, 1);
    assert_eq!(normal_image.format, ImageFormat::Rgba8Unorm);

    let frame = ctx.graph.frame();
    assert_eq!(occupied_slots(&ctx, frame.image_heap()), 3);
    assert_eq!(occupied_slots(&ctx, frame.sampler_heap()), 1);

    let uniform = material.uniform;
    assert_eq!(uniform.albedo_index, 0);
    assert_eq!(uniform.normal_index, 1);
    assert_eq!(uniform.metallic_roughness_index, 2);
    assert_eq!(uniform.sampler_index, 0);
    assert_eq!(uniform.base_color_factor, [0.5, 0.25, 1.0]);
    assert_eq!(uniform.metallic_factor, 0.2);
    assert_eq!(uniform.roughness_factor, 0.8);

    let data = &ctx.gpu.buffer(material.uniform_buffer).unwrap().data;
    let uploaded: MaterialUniform =
        bytemuck::pod_read_unaligned(&data[..std::mem::size_of::<MaterialUniform>()]);
    assert_eq!(uploaded, uniform);

    let (layout, writes) = ctx.gpu.descriptor_set(material.descriptor_set).unwrap();
    assert_eq!(layout, ctx.loader.material_layout());
    assert_eq!(writes.len(), 1);

    mesh.free(&mut ctx.gpu);
}

#[test]
fn test_material_without_textures_uses_absent_indices() {
    let mut ctx = TestContext::new();
    let images_before = ctx.gpu.live_image_count();
    let scene = scene_of(
        vec![triangle_primitive(Some(0))],
        vec![textured_material(None, None, None)],
    );
    let mesh = ctx
        .loader
        .load_scene(&mut ctx.gpu, &scene, Path::new(""))
        .unwrap();

    let material = &mesh.materials[0];
    assert!(!material.has_albedo());
    assert!(material.albedo_sampler.is_none());
    assert_eq!(material.uniform.albedo_index, ABSENT_INDEX);
    assert_eq!(material.uniform.normal_index, ABSENT_INDEX);
    assert_eq!(material.uniform.metallic_roughness_index, ABSENT_INDEX);
    assert_eq!(material.uniform.sampler_index, ABSENT_INDEX);
    assert_eq!(material.base_color_factor, Vec3::new(0.5, 0.25, 1.0));
    assert_eq!(ctx.gpu.live_image_count(), images_before);
    assert_eq!(ctx.gpu.live_sampler_count(), 0);
}

#[test]
fn test_primitives_without_material_get_none() {
    let mut ctx = TestContext::new();
    let scene = scene_of(
        vec![triangle_primitive(None), triangle_primitive(Some(7))],
        Vec::new(),
    );
    let mesh = ctx
        .loader
        .load_scene(&mut ctx.gpu, &scene, Path::new(""))
        .unwrap();

    assert!(mesh.materials.is_empty());
    assert!(mesh.primitives.iter().all(|p| p.material.is_none()));
}

#[test]
fn test_shared_material_is_loaded_per_primitive() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "albedo.png", 4, 4);

    let mut ctx = TestContext::new();
    let scene = scene_of(
        vec![triangle_primitive(Some(0)), triangle_primitive(Some(0))],
        vec![textured_material(Some("albedo.png"), None, None)],
    );
    let mesh = ctx.loader.load_scene(&mut ctx.gpu, &scene, dir.path()).unwrap();

    assert_eq!(mesh.materials.len(), 2);
    assert_eq!(mesh.primitives[0].material, Some(0));
    assert_eq!(mesh.primitives[1].material, Some(1));

    let (first, second) = (&mesh.materials[0], &mesh.materials[1]);
    assert_ne!(first.uniform_buffer, second.uniform_buffer);
    assert_ne!(first.descriptor_set, second.descriptor_set);
    assert_ne!(first.albedo.unwrap().image, second.albedo.unwrap().image);
    assert_eq!(first.uniform.albedo_index, 0);
    assert_eq!(second.uniform.albedo_index, 1);

    let frame = ctx.graph.frame();
    assert_eq!(occupied_slots(&ctx, frame.image_heap()), 2);
    assert_eq!(occupied_slots(&ctx, frame.sampler_heap()), 2);

    mesh.free(&mut ctx.gpu);
}

#[rstest]
#[case::parallel(true)]
#[case::sequential(false)]
fn test_missing_texture_fails_the_load(#[case] parallel: bool) {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "albedo.png", 4, 4);

    let mut ctx = TestContext::with_config(loader_config(parallel));
    let buffers_before = ctx.gpu.live_buffer_count();
    let scene = scene_of(
        vec![triangle_primitive(None), triangle_primitive(Some(0))],
        vec![textured_material(Some("albedo.png"), Some("missing.png"), None)],
    );

    let err = ctx
        .loader
        .load_scene(&mut ctx.gpu, &scene, dir.path())
        .unwrap_err();

    match err {
        LoadError::Texture { path, .. } => assert_eq!(path, dir.path().join("missing.png")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctx.gpu.live_buffer_count(), buffers_before);
}

#[test]
fn test_full_image_heap_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "albedo.png", 4, 4);
    write_png(dir.path(), "normal.png", 4, 4);

    let mut ctx = TestContext::with_config(RendererConfig {
        graph: GraphConfig {
            image_heap_capacity: 1,
            ..Default::default()
        },
        ..RendererConfig::new(64, 64)
    });
    let scene = scene_of(
        vec![triangle_primitive(Some(0))],
        vec![textured_material(Some("albedo.png"), Some("normal.png"), None)],
    );

    let err = ctx
        .loader
        .load_scene(&mut ctx.gpu, &scene, dir.path())
        .unwrap_err();
    assert!(matches!(err, LoadError::Gpu(GpuError::HeapFull(_))));
}

// ============================================================================
// Geometry
// ============================================================================

#[test]
fn test_grid_is_split_into_bounded_meshlets() {
    let mut ctx = TestContext::new();
    let mesh = ctx
        .loader
        .load_scene(
            &mut ctx.gpu,
            &scene_of(vec![grid_primitive(20)], Vec::new()),
            Path::new(""),
        )
        .unwrap();

    let primitive = &mesh.primitives[0];
    assert_eq!(primitive.vertex_count, 21 * 21);
    assert_eq!(primitive.triangle_count, 800);
    assert_eq!(primitive.meshlet_count as usize, primitive.meshlets.len());

    let covered: u32 = primitive.meshlets.iter().map(|m| m.triangle_count).sum();
    assert_eq!(covered, primitive.triangle_count);
    for meshlet in &primitive.meshlets {
        assert!(meshlet.vertex_count as usize <= MAX_MESHLET_VERTICES);
        assert!(meshlet.triangle_count as usize <= MAX_MESHLET_TRIANGLES);
    }

    let buffers = primitive.buffers.unwrap();
    let meshlet_bytes = &ctx.gpu.buffer(buffers.meshlet_buffer).unwrap().data;
    assert_eq!(
        meshlet_bytes.len(),
        primitive.meshlets.len() * std::mem::size_of::<Meshlet>()
    );
    assert_eq!(
        meshlet_bytes.as_slice(),
        bytemuck::cast_slice::<Meshlet, u8>(&primitive.meshlets)
    );

    assert_eq!(mesh.total_triangle_count, 800);
    assert_eq!(mesh.meshlet_count(), primitive.meshlet_count);
}

#[test]
fn test_child_nodes_contribute_primitives() {
    let mut ctx = TestContext::new();
    let mut scene = scene_of(vec![triangle_primitive(None)], Vec::new());
    let mut child = meshlet_renderer::asset::SceneNode::with_mesh(0);
    child.translation = Some(Vec3::new(0.0, 3.0, 0.0));
    scene.roots[0].children.push(child);

    let mesh = ctx
        .loader
        .load_scene(&mut ctx.gpu, &scene, Path::new(""))
        .unwrap();

    assert_eq!(mesh.primitives.len(), 2);
    assert_eq!(mesh.total_vertex_count, 6);
    assert_eq!(mesh.total_index_count, 6);
    let origin = mesh.primitives[1].transform.transform_point3(Vec3::ZERO);
    assert!(origin.abs_diff_eq(Vec3::new(0.0, 3.0, 0.0), 1e-5));
}

#[test]
fn test_free_restores_live_objects() {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "albedo.png", 8, 8);

    let mut ctx = TestContext::new();
    let baseline = ctx.gpu.live_object_count();
    let scene = scene_of(
        vec![grid_primitive(4), triangle_primitive(Some(0))],
        vec![textured_material(Some("albedo.png"), None, None)],
    );
    let mesh = ctx.loader.load_scene(&mut ctx.gpu, &scene, dir.path()).unwrap();
    assert!(ctx.gpu.live_object_count() > baseline);

    mesh.free(&mut ctx.gpu);
    assert_eq!(ctx.gpu.live_object_count(), baseline);

    let gpu = ctx.finish();
    assert_eq!(gpu.live_object_count(), 0);
}

#[rstest]
#[case::vertex_buffer(0)]
#[case::index_buffer(1)]
#[case::meshlet_buffer(2)]
fn test_failed_geometry_upload_releases_buffers(#[case] allocations_before_failure: usize) {
    let mut ctx = TestContext::new();
    let baseline = ctx.gpu.live_object_count();
    let limit = ctx.gpu.live_buffer_count() + allocations_before_failure;
    ctx.gpu.limit_buffers(limit);

    let scene = scene_of(vec![triangle_primitive(None)], Vec::new());
    let err = ctx
        .loader
        .load_scene(&mut ctx.gpu, &scene, Path::new(""))
        .unwrap_err();

    assert!(matches!(err, LoadError::Gpu(GpuError::OutOfMemory)));
    assert_eq!(ctx.gpu.live_object_count(), baseline);
}

// ============================================================================
// glTF Files
// ============================================================================

#[test]
fn test_load_gltf_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_triangle_gltf(dir.path());

    let mut ctx = TestContext::new();
    let mesh = ctx.loader.load(&mut ctx.gpu, &path).unwrap();

    assert_eq!(mesh.directory, dir.path());
    assert_eq!(mesh.primitives.len(), 1);
    let primitive = &mesh.primitives[0];
    assert_eq!(primitive.vertex_count, 3);
    assert_eq!(primitive.index_count, 3);
    assert_eq!(primitive.meshlet_count, 1);

    // Node translation followed by the half turn about Y
    let x = primitive.transform.transform_point3(Vec3::X);
    assert!(x.abs_diff_eq(Vec3::ZERO, 1e-5));

    let material = &mesh.materials[primitive.material.unwrap()];
    assert!(material.has_albedo());
    assert!(!material.has_normal());
    assert_eq!(material.uniform.normal_index, ABSENT_INDEX);
    assert_eq!(material.base_color_factor, Vec3::new(1.0, 0.5, 0.25));
    assert_eq!(material.roughness_factor, 0.5);

    let albedo = ctx.gpu.image(material.albedo.unwrap().image).unwrap();
    assert_eq!((albedo.width, albedo.height), (8, 4));

    mesh.free(&mut ctx.gpu);
}

#[test]
fn test_load_missing_gltf_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = TestContext::new();

    let err = ctx
        .loader
        .load(&mut ctx.gpu, dir.path().join("absent.gltf"))
        .unwrap_err();
    assert!(matches!(err, LoadError::Parse { .. }));
}

#[test]
fn test_sequential_config_is_respected() {
    let config = loader_config(false);
    assert!(!config.loader.parallel_texture_loading);
    assert_eq!(config.loader.material_set_binding, 3);
    assert_eq!(config.loader.geometry_set_binding, 4);
}
