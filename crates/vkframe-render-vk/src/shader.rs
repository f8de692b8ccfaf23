// SPDX-License-Identifier: CEPL-1.0
use std::io::Cursor;
use std::path::Path;
use std::{fmt, fs};

use ash::util::read_spv;

use crate::error::InitError;

const SPIRV_MAGIC: u32 = 0x0723_0203;

static BUILTIN_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/frame.vert.spv"));
static BUILTIN_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/frame.frag.spv"));

/// Pre-compiled vertex + fragment SPIR-V. Opaque to the engine apart from
/// framing checks; entry point is `main` for both stages.
#[derive(Clone)]
pub struct ShaderBlobs {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

impl fmt::Debug for ShaderBlobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderBlobs")
            .field("vertex_bytes", &self.vertex.len())
            .field("fragment_bytes", &self.fragment.len())
            .finish()
    }
}

impl ShaderBlobs {
    /// The shaders compiled into the crate by its build script.
    pub fn builtin() -> Self {
        Self {
            vertex: BUILTIN_VERT.to_vec(),
            fragment: BUILTIN_FRAG.to_vec(),
        }
    }

    /// Read both stages whole from disk.
    pub fn from_paths(vertex: &Path, fragment: &Path) -> Result<Self, InitError> {
        let read = |p: &Path| {
            fs::read(p).map_err(|e| InitError::Shader {
                name: p.display().to_string(),
                reason: e.to_string(),
            })
        };
        let blobs = Self {
            vertex: read(vertex)?,
            fragment: read(fragment)?,
        };
        blobs.vertex_words()?;
        blobs.fragment_words()?;
        Ok(blobs)
    }

    pub fn vertex_words(&self) -> Result<Vec<u32>, InitError> {
        spirv_words("vertex", &self.vertex)
    }

    pub fn fragment_words(&self) -> Result<Vec<u32>, InitError> {
        spirv_words("fragment", &self.fragment)
    }
}

/// Reinterpret a byte blob as SPIR-V words, checking size and magic.
pub fn spirv_words(name: &str, bytes: &[u8]) -> Result<Vec<u32>, InitError> {
    let invalid = |reason: String| InitError::Shader {
        name: name.to_owned(),
        reason,
    };
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(invalid(format!(
            "size {} is not a non-zero multiple of 4",
            bytes.len()
        )));
    }
    let words = read_spv(&mut Cursor::new(bytes)).map_err(|e| invalid(e.to_string()))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(invalid("missing SPIR-V magic number".into()));
    }
    Ok(words)
}
