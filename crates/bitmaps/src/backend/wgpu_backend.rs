use slotmap::SlotMap;

use super::{
    TexelFormat, TextureAccess, TextureBackend, TextureDescriptor, TextureExtent, TextureKey,
    check_pitched_buffer, pitched_rows,
};
use crate::BackendError;

const GPU_TEXEL_BYTES: usize = 4;

struct WgpuTexture {
    texture: wgpu::Texture,
    format: TexelFormat,
}

/// Bitmap textures on a wgpu device.
///
/// Every bitmap texture is stored as `Bgra8Unorm`, which matches the byte
/// order of little-endian ARGB pixels. 5-6-5 pixels are widened on upload.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: SlotMap<TextureKey, WgpuTexture>,
    display: Option<wgpu::Texture>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            textures: SlotMap::with_key(),
            display: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn texture(&self, key: TextureKey) -> Option<&wgpu::Texture> {
        self.textures.get(key).map(|entry| &entry.texture)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Selects the texture `read_pixels` copies from. It needs `COPY_SRC`
    /// usage and an 8-bit RGBA or BGRA format.
    pub fn set_display_texture(&mut self, texture: Option<wgpu::Texture>) {
        self.display = texture;
    }
}

impl TextureBackend for WgpuBackend {
    fn max_texture_size(&self) -> TextureExtent {
        let max = self.device.limits().max_texture_dimension_2d;
        TextureExtent::new(max, max)
    }

    fn create_texture(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureKey, BackendError> {
        let limit = self.max_texture_size();
        if !descriptor.extent().fits_within(limit) {
            return Err(BackendError::TextureTooLarge {
                width: descriptor.width,
                height: descriptor.height,
                max_width: limit.width,
                max_height: limit.height,
            });
        }

        let label = match descriptor.access {
            TextureAccess::Static => "bitmaps.texture",
            TextureAccess::Streaming => "bitmaps.streaming_texture",
        };
        let error_scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Bgra8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(error_scope.pop()) {
            return Err(BackendError::TextureCreate(error.to_string()));
        }

        Ok(self.textures.insert(WgpuTexture {
            texture,
            format: descriptor.format,
        }))
    }

    fn update_texture(
        &mut self,
        key: TextureKey,
        pixels: &[u8],
        pitch: usize,
    ) -> Result<(), BackendError> {
        let entry = self
            .textures
            .get(key)
            .ok_or(BackendError::UnknownTexture(key))?;
        let extent = TextureExtent::new(entry.texture.width(), entry.texture.height());
        let row_bytes = check_pitched_buffer(extent, entry.format, pixels.len(), pitch)?;

        let widened;
        let (data, bytes_per_row) = match entry.format {
            TexelFormat::Argb8888 => (pixels, pitch),
            TexelFormat::Rgb565 => {
                widened = widen_rgb565(pixels, pitch, row_bytes, extent.height as usize);
                (widened.as_slice(), extent.width as usize * GPU_TEXEL_BYTES)
            }
        };
        let bytes_per_row =
            u32::try_from(bytes_per_row).map_err(|_| BackendError::UploadSizeMismatch {
                required: row_bytes,
                actual: pitch,
            })?;

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(extent.height),
            },
            wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy_texture(&mut self, key: TextureKey) -> bool {
        match self.textures.remove(key) {
            Some(entry) => {
                entry.texture.destroy();
                true
            }
            None => false,
        }
    }

    fn read_pixels(
        &mut self,
        format: TexelFormat,
        extent: TextureExtent,
        dst: &mut [u8],
        pitch: usize,
    ) -> Result<(), BackendError> {
        let display = self
            .display
            .as_ref()
            .ok_or(BackendError::ReadbackUnavailable)?;
        let order = ChannelOrder::for_format(display.format()).ok_or_else(|| {
            BackendError::Readback(format!(
                "display format {:?} cannot be read back",
                display.format()
            ))
        })?;
        check_pitched_buffer(extent, format, dst.len(), pitch)?;

        let visible = extent.clamp_to(TextureExtent::new(display.width(), display.height()));
        if visible.width == 0 || visible.height == 0 {
            return Ok(());
        }
        let row_bytes = visible.width as usize * GPU_TEXEL_BYTES;
        let padded_row_bytes =
            row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("bitmaps.display_readback"),
            size: (padded_row_bytes as u64) * u64::from(visible.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("bitmaps.display_readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: display,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes as u32),
                    rows_per_image: Some(visible.height),
                },
            },
            wgpu::Extent3d {
                width: visible.width,
                height: visible.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|error| BackendError::Readback(error.to_string()))?;
        receiver
            .recv()
            .map_err(|error| BackendError::Readback(error.to_string()))?
            .map_err(|error| BackendError::Readback(error.to_string()))?;

        let mapped = slice.get_mapped_range();
        let texel_bytes = format.bytes_per_texel();
        for (y, src_row) in mapped
            .chunks_exact(padded_row_bytes)
            .take(visible.height as usize)
            .enumerate()
        {
            let dst_row = &mut dst[y * pitch..][..visible.width as usize * texel_bytes];
            for (src, out) in src_row[..row_bytes]
                .chunks_exact(GPU_TEXEL_BYTES)
                .zip(dst_row.chunks_exact_mut(texel_bytes))
            {
                let [b, g, r, a] = order.to_bgra([src[0], src[1], src[2], src[3]]);
                match format {
                    TexelFormat::Argb8888 => out.copy_from_slice(&[b, g, r, a]),
                    TexelFormat::Rgb565 => out.copy_from_slice(&pack_rgb565(r, g, b).to_le_bytes()),
                }
            }
        }
        drop(mapped);
        buffer.unmap();
        Ok(())
    }

    fn texture_size(&self, key: TextureKey) -> Option<TextureExtent> {
        self.textures
            .get(key)
            .map(|entry| TextureExtent::new(entry.texture.width(), entry.texture.height()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelOrder {
    Bgra,
    Rgba,
}

impl ChannelOrder {
    fn for_format(format: wgpu::TextureFormat) -> Option<Self> {
        match format {
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
                Some(ChannelOrder::Bgra)
            }
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
                Some(ChannelOrder::Rgba)
            }
            _ => None,
        }
    }

    fn to_bgra(self, texel: [u8; 4]) -> [u8; 4] {
        match self {
            ChannelOrder::Bgra => texel,
            ChannelOrder::Rgba => [texel[2], texel[1], texel[0], texel[3]],
        }
    }
}

fn widen_rgb565(pixels: &[u8], pitch: usize, row_bytes: usize, rows: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(row_bytes / 2 * GPU_TEXEL_BYTES * rows);
    for row in pitched_rows(pixels, pitch, row_bytes, rows) {
        for texel in row.chunks_exact(2) {
            let value = u16::from_le_bytes([texel[0], texel[1]]);
            let r = ((value >> 11) & 0x1F) as u8;
            let g = ((value >> 5) & 0x3F) as u8;
            let b = (value & 0x1F) as u8;
            out.extend_from_slice(&[
                (b << 3) | (b >> 2),
                (g << 2) | (g >> 4),
                (r << 3) | (r >> 2),
                0xFF,
            ]);
        }
    }
    out
}

fn pack_rgb565(r: u8, g: u8, b: u8) -> u16 {
    (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_device_queue() -> Option<(wgpu::Device, wgpu::Queue)> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok()?;
            let limits = adapter.limits();
            adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("bitmaps tests"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .ok()
        })
    }

    fn descriptor(width: u32, height: u32, format: TexelFormat) -> TextureDescriptor {
        TextureDescriptor {
            width,
            height,
            format,
            access: TextureAccess::Static,
        }
    }

    #[test]
    fn widening_565_replicates_high_bits() {
        let white = 0xFFFF_u16.to_le_bytes();
        let red = 0xF800_u16.to_le_bytes();
        let pixels = [white[0], white[1], red[0], red[1]];
        assert_eq!(
            widen_rgb565(&pixels, 4, 4, 1),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0xFF, 0xFF]
        );
        assert_eq!(pack_rgb565(0xFF, 0x00, 0xFF), 0xF81F);
    }

    #[test]
    fn argb_texture_reads_back_through_the_display() {
        let Some((device, queue)) = create_device_queue() else {
            eprintln!("skipping: no wgpu adapter");
            return;
        };
        let mut backend = WgpuBackend::new(device, queue);
        let key = backend
            .create_texture(&descriptor(3, 2, TexelFormat::Argb8888))
            .expect("create texture");
        let pixels = (0..24u8).collect::<Vec<_>>();
        backend.update_texture(key, &pixels, 12).expect("upload");

        let display = backend.texture(key).cloned();
        backend.set_display_texture(display);
        let mut readback = vec![0u8; 24];
        backend
            .read_pixels(
                TexelFormat::Argb8888,
                TextureExtent::new(3, 2),
                &mut readback,
                12,
            )
            .expect("read back");
        assert_eq!(readback, pixels);

        assert!(backend.destroy_texture(key));
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn rgb565_survives_an_upload_and_readback() {
        let Some((device, queue)) = create_device_queue() else {
            eprintln!("skipping: no wgpu adapter");
            return;
        };
        let mut backend = WgpuBackend::new(device, queue);
        let key = backend
            .create_texture(&descriptor(2, 1, TexelFormat::Rgb565))
            .expect("create texture");
        let mut pixels = Vec::new();
        pixels.extend_from_slice(&0xF81F_u16.to_le_bytes());
        pixels.extend_from_slice(&0x07E0_u16.to_le_bytes());
        backend.update_texture(key, &pixels, 4).expect("upload");

        let display = backend.texture(key).cloned();
        backend.set_display_texture(display);
        let mut readback = vec![0u8; 4];
        backend
            .read_pixels(TexelFormat::Rgb565, TextureExtent::new(2, 1), &mut readback, 4)
            .expect("read back");
        assert_eq!(readback, pixels);
    }

    #[test]
    fn oversized_textures_are_rejected_before_reaching_the_device() {
        let Some((device, queue)) = create_device_queue() else {
            eprintln!("skipping: no wgpu adapter");
            return;
        };
        let mut backend = WgpuBackend::new(device, queue);
        let limit = backend.max_texture_size();
        assert!(matches!(
            backend.create_texture(&descriptor(limit.width + 1, 1, TexelFormat::Argb8888)),
            Err(BackendError::TextureTooLarge { .. })
        ));
        assert_eq!(backend.live_textures(), 0);
    }
}
