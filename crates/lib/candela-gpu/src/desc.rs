#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R32G32B32A32Float,
    R16G16B16A16Float,
    R10G10B10A2Unorm,
    R32G32Float,
    R16G16Float,
    R32Float,
    R16Float,
    R8G8B8A8Unorm,
}

impl TextureFormat {
    pub const fn block_bytes(self) -> usize {
        match self {
            Self::R32G32B32A32Float => 16,
            Self::R16G16B16A16Float => 8,
            Self::R10G10B10A2Unorm => 4,
            Self::R32G32Float => 8,
            Self::R16G16Float => 4,
            Self::R32Float => 4,
            Self::R16Float => 2,
            Self::R8G8B8A8Unorm => 4,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct TextureUsage {
    pub storage: bool,
    pub sampled: bool,
    pub copy_src: bool,
    pub copy_dst: bool,
}

impl TextureUsage {
    pub const STORAGE_SAMPLED: Self = Self {
        storage: true,
        sampled: true,
        copy_src: false,
        copy_dst: false,
    };

    pub const fn with_copy(mut self) -> Self {
        self.copy_src = true;
        self.copy_dst = true;
        self
    }
}

/// A 2D texture array; single 2D textures are `array_layers == 1`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDesc {
    pub fn new_2d_array(width: u32, height: u32, array_layers: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            array_layers,
            mip_levels: 1,
            format,
            usage: TextureUsage::STORAGE_SAMPLED,
        }
    }

    pub fn usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn layer_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.format.block_bytes()
    }

    pub fn total_bytes(&self) -> usize {
        self.layer_bytes() * self.array_layers as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    DeviceLocal,
    /// CPU-writable staging memory.
    Upload,
    /// CPU-readable memory for GPU->CPU copies.
    Readback,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct BufferUsage {
    pub storage: bool,
    pub constant: bool,
    pub copy_src: bool,
    pub copy_dst: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub size_bytes: usize,
    pub usage: BufferUsage,
    pub memory: MemoryKind,
}

impl BufferDesc {
    pub fn device_local(size_bytes: usize) -> Self {
        Self {
            size_bytes,
            usage: BufferUsage {
                storage: true,
                constant: true,
                copy_src: false,
                copy_dst: true,
            },
            memory: MemoryKind::DeviceLocal,
        }
    }

    pub fn upload(size_bytes: usize) -> Self {
        Self {
            size_bytes,
            usage: BufferUsage {
                storage: false,
                constant: true,
                copy_src: true,
                copy_dst: false,
            },
            memory: MemoryKind::Upload,
        }
    }

    pub fn readback(size_bytes: usize) -> Self {
        Self {
            size_bytes,
            usage: BufferUsage {
                storage: false,
                constant: false,
                copy_src: false,
                copy_dst: true,
            },
            memory: MemoryKind::Readback,
        }
    }
}
