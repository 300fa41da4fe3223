use std::path::PathBuf;

/// A shader permutation: source file, entry point, and preprocessor
/// defines. Two sources with different defines compile to distinct
/// modules and must get distinct pipelines.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub entry: String,
    pub defines: Vec<(String, String)>,
}

impl ShaderSource {
    pub fn compute(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entry: "main".to_owned(),
            defines: Vec::new(),
        }
    }

    pub fn entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn define(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.defines.push((name.into(), value.to_string()));
        self
    }
}

/// Ray-tracing pipeline description: one raygen, plus miss/hit groups.
#[derive(Clone, Debug)]
pub struct RtPipelineDesc {
    pub raygen: ShaderSource,
    pub miss: Vec<ShaderSource>,
    pub hit: Vec<ShaderSource>,
    pub max_recursion_depth: u32,
}

/// Shader-table layout: all records share the max record size, aligned
/// up to the backend's record alignment rule.
#[derive(Clone, Debug)]
pub struct ShaderTableDesc {
    pub raygen_records: u32,
    pub miss_records: u32,
    pub hit_records: u32,
    pub record_stride: u32,
}

impl ShaderTableDesc {
    pub const RECORD_ALIGNMENT: u32 = 64;

    pub fn with_record_size(raygen: u32, miss: u32, hit: u32, max_record_bytes: u32) -> Self {
        let stride = max_record_bytes.next_multiple_of(Self::RECORD_ALIGNMENT);
        Self {
            raygen_records: raygen,
            miss_records: miss,
            hit_records: hit,
            record_stride: stride,
        }
    }

    pub fn total_bytes(&self) -> usize {
        (self.raygen_records + self.miss_records + self.hit_records) as usize
            * self.record_stride as usize
    }
}
