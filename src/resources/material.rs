//! Material loading for bindless PBR shading

use std::path::{Path, PathBuf};
use std::thread::ScopedJoinHandle;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::asset::MaterialAsset;
use crate::backend::{
    BufferHandle, BufferKind, DescriptorHeapHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorWrite, GpuDevice, ImageHandle, SamplerDescriptor, SamplerHandle,
};
use crate::resources::error::{LoadError, LoadResult};
use crate::resources::texture::RawImage;

/// Bindless index written for a texture the material does not have
pub const ABSENT_INDEX: i32 = -1;

/// A texture uploaded to the GPU and registered in the image heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialTexture {
    pub image: ImageHandle,
    pub bindless_index: u32,
}

/// A sampler registered in the sampler heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialSampler {
    pub sampler: SamplerHandle,
    pub bindless_index: u32,
}

/// Material uniform data for GPU, bound as the single buffer of the material set
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub albedo_index: i32,
    pub normal_index: i32,
    pub metallic_roughness_index: i32,
    pub sampler_index: i32,
    pub base_color_factor: [f32; 3],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    _pad: [f32; 3],
}

/// Heaps and layout a material registers itself with
#[derive(Debug, Clone, Copy)]
pub(crate) struct MaterialBindings {
    pub image_heap: DescriptorHeapHandle,
    pub sampler_heap: DescriptorHeapHandle,
    pub layout: DescriptorSetLayoutHandle,
    pub parallel: bool,
}

/// Absolute texture paths of one material
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TexturePaths {
    pub albedo: Option<PathBuf>,
    pub normal: Option<PathBuf>,
    pub metallic_roughness: Option<PathBuf>,
}

impl TexturePaths {
    /// Join each relative URI onto the mesh directory
    pub fn resolve(directory: &Path, asset: &MaterialAsset) -> Self {
        let join = |uri: &Option<String>| uri.as_ref().map(|uri| directory.join(uri));
        Self {
            albedo: join(&asset.base_color_texture),
            normal: join(&asset.normal_texture),
            metallic_roughness: join(&asset.metallic_roughness_texture),
        }
    }

    pub fn count(&self) -> usize {
        [&self.albedo, &self.normal, &self.metallic_roughness]
            .iter()
            .filter(|p| p.is_some())
            .count()
    }
}

/// Decoded pixels for each texture slot
#[derive(Debug, Default)]
pub struct DecodedTextures {
    pub albedo: Option<RawImage>,
    pub normal: Option<RawImage>,
    pub metallic_roughness: Option<RawImage>,
}

impl DecodedTextures {
    /// Decode every present texture in a fixed order: albedo, normal, metallic-roughness
    pub fn decode_sequential(paths: &TexturePaths) -> LoadResult<Self> {
        let load = |path: &Option<PathBuf>| path.as_ref().map(RawImage::from_file).transpose();
        Ok(Self {
            albedo: load(&paths.albedo)?,
            normal: load(&paths.normal)?,
            metallic_roughness: load(&paths.metallic_roughness)?,
        })
    }

    /// Decode every present texture on its own scoped thread and join them all.
    ///
    /// Each task owns a mutable reference to exactly one result slot, so the
    /// slots never alias.
    pub fn decode_parallel(paths: &TexturePaths) -> LoadResult<Self> {
        let mut albedo = None;
        let mut normal = None;
        let mut metallic_roughness = None;

        std::thread::scope(|scope| {
            let slots: [(&Option<PathBuf>, &mut Option<LoadResult<RawImage>>); 3] = [
                (&paths.albedo, &mut albedo),
                (&paths.normal, &mut normal),
                (&paths.metallic_roughness, &mut metallic_roughness),
            ];

            let tasks: Vec<_> = slots
                .into_iter()
                .filter_map(|(path, slot)| {
                    let path = path.as_ref()?;
                    let task = scope.spawn(move || {
                        *slot = Some(RawImage::from_file(path));
                    });
                    Some((path, task))
                })
                .collect();

            log::debug!("Decoding {} textures in parallel", tasks.len());

            join_decodes(tasks)
        })?;

        Ok(Self {
            albedo: albedo.transpose()?,
            normal: normal.transpose()?,
            metallic_roughness: metallic_roughness.transpose()?,
        })
    }
}

/// Join every task, then report the first one that panicked
fn join_decodes(tasks: Vec<(&PathBuf, ScopedJoinHandle<'_, ()>)>) -> LoadResult<()> {
    let joined: Vec<LoadResult<()>> = tasks
        .into_iter()
        .map(|(path, task)| {
            task.join()
                .map_err(|_| LoadError::TextureTaskPanicked(path.clone()))
        })
        .collect();
    joined.into_iter().collect()
}

/// A loaded material: uploaded textures, sampler, factors and its descriptor set
#[derive(Debug)]
pub struct Material {
    pub name: Option<String>,
    pub albedo: Option<MaterialTexture>,
    pub normal: Option<MaterialTexture>,
    pub metallic_roughness: Option<MaterialTexture>,
    pub albedo_sampler: Option<MaterialSampler>,
    pub base_color_factor: Vec3,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub uniform: MaterialUniform,
    pub uniform_buffer: BufferHandle,
    pub descriptor_set: DescriptorSetHandle,
}

impl Material {
    /// Decode, upload and register every texture of `asset`, then build the material set
    pub(crate) fn load(
        gpu: &mut dyn GpuDevice,
        asset: &MaterialAsset,
        directory: &Path,
        bindings: &MaterialBindings,
    ) -> LoadResult<Self> {
        let paths = TexturePaths::resolve(directory, asset);
        let decoded = if bindings.parallel && paths.count() > 1 {
            DecodedTextures::decode_parallel(&paths)?
        } else {
            DecodedTextures::decode_sequential(&paths)?
        };

        let albedo = decoded
            .albedo
            .map(|raw| register_texture(gpu, bindings.image_heap, &raw, true))
            .transpose()?;

        let albedo_sampler = match albedo {
            Some(texture) => {
                let mip_levels = gpu.image_mip_levels(texture.image);
                let sampler = gpu.create_sampler(&SamplerDescriptor::default(), mip_levels)?;
                let bindless_index = gpu.find_available_descriptor(bindings.sampler_heap)?;
                gpu.push_heap_sampler(bindings.sampler_heap, sampler, bindless_index);
                Some(MaterialSampler {
                    sampler,
                    bindless_index,
                })
            }
            None => None,
        };

        let normal = decoded
            .normal
            .map(|raw| register_texture(gpu, bindings.image_heap, &raw.into_linear(), false))
            .transpose()?;
        let metallic_roughness = decoded
            .metallic_roughness
            .map(|raw| register_texture(gpu, bindings.image_heap, &raw.into_linear(), false))
            .transpose()?;

        let base_color_factor = Vec3::from_slice(&asset.base_color_factor[..3]);
        let uniform = MaterialUniform {
            albedo_index: bindless_or_absent(albedo.map(|t| t.bindless_index)),
            normal_index: bindless_or_absent(normal.map(|t| t.bindless_index)),
            metallic_roughness_index: bindless_or_absent(metallic_roughness.map(|t| t.bindless_index)),
            sampler_index: bindless_or_absent(albedo_sampler.map(|s| s.bindless_index)),
            base_color_factor: base_color_factor.to_array(),
            metallic_factor: asset.metallic_factor,
            roughness_factor: asset.roughness_factor,
            _pad: [0.0; 3],
        };

        let size = std::mem::size_of::<MaterialUniform>() as u64;
        let uniform_buffer = gpu.allocate_buffer(size, BufferKind::Uniform)?;
        gpu.upload_buffer(uniform_buffer, bytemuck::bytes_of(&uniform));

        let descriptor_set = gpu.create_descriptor_set(bindings.layout)?;
        gpu.write_descriptor_set(
            descriptor_set,
            0,
            DescriptorWrite::Buffer {
                buffer: uniform_buffer,
                size,
            },
        );

        log::debug!(
            "Loaded material {:?} with {} textures",
            asset.name.as_deref().unwrap_or("unnamed"),
            paths.count()
        );

        Ok(Self {
            name: asset.name.clone(),
            albedo,
            normal,
            metallic_roughness,
            albedo_sampler,
            base_color_factor,
            metallic_factor: asset.metallic_factor,
            roughness_factor: asset.roughness_factor,
            uniform,
            uniform_buffer,
            descriptor_set,
        })
    }

    pub fn has_albedo(&self) -> bool {
        self.albedo.is_some()
    }

    pub fn has_normal(&self) -> bool {
        self.normal.is_some()
    }

    pub fn has_metallic_roughness(&self) -> bool {
        self.metallic_roughness.is_some()
    }

    /// Release every GPU object owned by this material
    pub fn free(self, gpu: &mut dyn GpuDevice) {
        for texture in [self.albedo, self.normal, self.metallic_roughness]
            .into_iter()
            .flatten()
        {
            gpu.free_image(texture.image);
        }
        if let Some(sampler) = self.albedo_sampler {
            gpu.free_sampler(sampler.sampler);
        }
        gpu.free_descriptor_set(self.descriptor_set);
        gpu.free_buffer(self.uniform_buffer);
    }
}

fn register_texture(
    gpu: &mut dyn GpuDevice,
    heap: DescriptorHeapHandle,
    raw: &RawImage,
    generate_mips: bool,
) -> LoadResult<MaterialTexture> {
    let image = gpu.upload_image(raw, generate_mips)?;
    let bindless_index = gpu.find_available_descriptor(heap)?;
    gpu.push_heap_image(heap, image, bindless_index);
    Ok(MaterialTexture {
        image,
        bindless_index,
    })
}

fn bindless_or_absent(index: Option<u32>) -> i32 {
    index.map_or(ABSENT_INDEX, |i| i as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_every_decode_task_is_joined_after_a_panic() {
        let broken = PathBuf::from("broken.png");
        let slow = PathBuf::from("slow.png");
        let finished = AtomicUsize::new(0);

        let result = std::thread::scope(|scope| {
            let tasks: Vec<(&PathBuf, ScopedJoinHandle<'_, ()>)> = vec![
                (&broken, scope.spawn(|| panic!("decoder failure"))),
                (
                    &slow,
                    scope.spawn(|| {
                        std::thread::sleep(Duration::from_millis(50));
                        finished.fetch_add(1, Ordering::SeqCst);
                    }),
                ),
            ];
            let result = join_decodes(tasks);
            assert_eq!(finished.load(Ordering::SeqCst), 1);
            result
        });

        assert!(matches!(
            result,
            Err(LoadError::TextureTaskPanicked(path)) if path == broken
        ));
    }

    #[test]
    fn test_material_uniform_layout() {
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 48);
        assert_eq!(std::mem::offset_of!(MaterialUniform, base_color_factor), 16);
        assert_eq!(std::mem::offset_of!(MaterialUniform, metallic_factor), 28);
        assert_eq!(std::mem::offset_of!(MaterialUniform, roughness_factor), 32);
    }

    #[test]
    fn test_resolve_joins_directory() {
        let asset = MaterialAsset {
            base_color_texture: Some("albedo.png".into()),
            normal_texture: None,
            metallic_roughness_texture: Some("textures/mr.png".into()),
            ..Default::default()
        };
        let paths = TexturePaths::resolve(Path::new("assets/helmet"), &asset);

        assert_eq!(paths.albedo, Some(PathBuf::from("assets/helmet/albedo.png")));
        assert_eq!(paths.normal, None);
        assert_eq!(
            paths.metallic_roughness,
            Some(PathBuf::from("assets/helmet/textures/mr.png"))
        );
        assert_eq!(paths.count(), 2);
    }

    #[test]
    fn test_absent_index() {
        assert_eq!(bindless_or_absent(None), -1);
        assert_eq!(bindless_or_absent(Some(7)), 7);
    }

    #[test]
    fn test_no_textures_decodes_nothing() {
        let paths = TexturePaths::default();
        let sequential = DecodedTextures::decode_sequential(&paths).unwrap();
        let parallel = DecodedTextures::decode_parallel(&paths).unwrap();
        assert!(sequential.albedo.is_none() && parallel.albedo.is_none());
    }

    #[test]
    fn test_parallel_missing_file_reports_path() {
        let paths = TexturePaths {
            albedo: Some(PathBuf::from("missing/albedo.png")),
            normal: Some(PathBuf::from("missing/normal.png")),
            metallic_roughness: None,
        };
        match DecodedTextures::decode_parallel(&paths).unwrap_err() {
            LoadError::Texture { path, .. } => assert_eq!(path, PathBuf::from("missing/albedo.png")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
