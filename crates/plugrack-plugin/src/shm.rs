//! Shared-memory regions and the bridge audio pool.
//!
//! Regions are plain files under `/dev/shm` (Linux) or the temp dir,
//! mapped with `memmap2`. The creator owns the file and unlinks it on drop;
//! the worker attaches to an existing file by name.

use crate::error::{BridgeError, Result};
use memmap2::MmapMut;
use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Role names baked into region file names.
pub const REGION_AUDIO_POOL: &str = "shm";
pub const REGION_RT_CLIENT: &str = "shm_rt";
pub const REGION_NON_RT_CLIENT: &str = "shm_non-rt";
pub const REGION_NON_RT_SERVER: &str = "shm_rts";

fn shm_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/dev/shm")
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::temp_dir()
    }
}

/// `plugrack-bridge_<role>_<suffix>`
pub fn region_file_name(role: &str, suffix: &str) -> String {
    format!("plugrack-bridge_{role}_{suffix}")
}

/// Six alphanumeric characters, unique enough across processes and calls.
pub fn random_suffix() -> String {
    static STATE: AtomicU64 = AtomicU64::new(0);
    let mut x = STATE.fetch_add(1, Ordering::Relaxed) ^ u64::from(std::process::id()) << 32;
    x ^= std::time::UNIX_EPOCH
        .elapsed()
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut out = String::with_capacity(6);
    for _ in 0..6 {
        // splitmix64 step
        x = x.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = x;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^= z >> 31;
        out.push(CHARS[(z % CHARS.len() as u64) as usize] as char);
    }
    out
}

/// One mapped region. Interior mutability because both sides of the bridge
/// write through shared references; all access goes through types that
/// carry their own synchronization (rings, semaphores, pool slots).
pub struct SharedMemory {
    map: UnsafeCell<MmapMut>,
    path: PathBuf,
    size: usize,
    owner: bool,
}

unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    pub fn create(file_name: &str, size: usize) -> Result<Self> {
        let path = shm_dir().join(file_name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| BridgeError::SharedMemory(format!("create {}: {e}", path.display())))?;
        file.set_len(size as u64)
            .map_err(|e| BridgeError::SharedMemory(format!("size {}: {e}", path.display())))?;
        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| BridgeError::SharedMemory(format!("map {}: {e}", path.display())))?;
        Ok(Self {
            map: UnsafeCell::new(map),
            path,
            size,
            owner: true,
        })
    }

    pub fn attach(file_name: &str) -> Result<Self> {
        let path = shm_dir().join(file_name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| BridgeError::SharedMemory(format!("attach {}: {e}", path.display())))?;
        let size = file
            .metadata()
            .map_err(|e| BridgeError::SharedMemory(e.to_string()))?
            .len() as usize;
        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| BridgeError::SharedMemory(format!("map {}: {e}", path.display())))?;
        Ok(Self {
            map: UnsafeCell::new(map),
            path,
            size,
            owner: false,
        })
    }

    /// Grow or shrink the backing file and remap. Owner side only; the peer
    /// re-attaches after being told the new size out-of-band.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if !self.owner {
            return Err(BridgeError::SharedMemory(
                "resize on non-owning mapping".into(),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| BridgeError::SharedMemory(e.to_string()))?;
        file.set_len(new_size as u64)
            .map_err(|e| BridgeError::SharedMemory(e.to_string()))?;
        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| BridgeError::SharedMemory(e.to_string()))?;
        self.map = UnsafeCell::new(map);
        self.size = new_size;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        unsafe { (*self.map.get()).as_mut_ptr() }
    }

    /// View the region as a `#[repr(C)]` struct placed at offset zero.
    ///
    /// The caller must have created the region at least `size_of::<T>()`
    /// bytes long.
    pub fn view<T>(&self) -> *mut T {
        debug_assert!(std::mem::size_of::<T>() <= self.size);
        self.as_ptr() as *mut T
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if self.owner {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Contiguous float region carrying one cycle of audio and CV both ways.
///
/// Layout: `audio_in + cv_in` input slots followed by `audio_out + cv_out`
/// output slots, each `buffer_size` floats. The engine fills the leading
/// slots, the worker fills the trailing ones.
pub struct SharedAudioPool {
    shm: SharedMemory,
    audio_in: u32,
    audio_out: u32,
    cv_in: u32,
    cv_out: u32,
    buffer_size: u32,
}

impl SharedAudioPool {
    fn float_count(audio_in: u32, audio_out: u32, cv_in: u32, cv_out: u32, buffer_size: u32) -> usize {
        (((audio_in + audio_out + cv_in + cv_out) * buffer_size) as usize).max(1)
    }

    pub fn create(
        file_name: &str,
        audio_in: u32,
        audio_out: u32,
        cv_in: u32,
        cv_out: u32,
        buffer_size: u32,
    ) -> Result<Self> {
        let floats = Self::float_count(audio_in, audio_out, cv_in, cv_out, buffer_size);
        let shm = SharedMemory::create(file_name, floats * std::mem::size_of::<f32>())?;
        Ok(Self {
            shm,
            audio_in,
            audio_out,
            cv_in,
            cv_out,
            buffer_size,
        })
    }

    pub fn attach(
        file_name: &str,
        audio_in: u32,
        audio_out: u32,
        cv_in: u32,
        cv_out: u32,
        buffer_size: u32,
    ) -> Result<Self> {
        let shm = SharedMemory::attach(file_name)?;
        let need =
            Self::float_count(audio_in, audio_out, cv_in, cv_out, buffer_size) * std::mem::size_of::<f32>();
        if shm.len() < need {
            return Err(BridgeError::SharedMemory(format!(
                "audio pool too small: {} < {need}",
                shm.len()
            )));
        }
        Ok(Self {
            shm,
            audio_in,
            audio_out,
            cv_in,
            cv_out,
            buffer_size,
        })
    }

    /// Grow for a new buffer size. No cycle may be in flight.
    pub fn resize(&mut self, buffer_size: u32) -> Result<()> {
        let floats = Self::float_count(self.audio_in, self.audio_out, self.cv_in, self.cv_out, buffer_size);
        self.shm.resize(floats * std::mem::size_of::<f32>())?;
        self.buffer_size = buffer_size;
        Ok(())
    }

    /// Owner-side: set the port layout once it is known (bridged plugins
    /// describe themselves after the pool is created) and resize to match.
    pub fn reconfigure(
        &mut self,
        audio_in: u32,
        audio_out: u32,
        cv_in: u32,
        cv_out: u32,
        buffer_size: u32,
    ) -> Result<()> {
        self.audio_in = audio_in;
        self.audio_out = audio_out;
        self.cv_in = cv_in;
        self.cv_out = cv_out;
        self.resize(buffer_size)
    }

    /// Re-map after the owner resized.
    pub fn reattach(&mut self, buffer_size: u32) -> Result<()> {
        let name = self
            .shm
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.shm = SharedMemory::attach(&name)?;
        self.buffer_size = buffer_size;
        let need = Self::float_count(self.audio_in, self.audio_out, self.cv_in, self.cv_out, buffer_size)
            * std::mem::size_of::<f32>();
        if self.shm.len() < need {
            return Err(BridgeError::SharedMemory(format!(
                "audio pool too small after resize: {} < {need}",
                self.shm.len()
            )));
        }
        Ok(())
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn input_slots(&self) -> u32 {
        self.audio_in + self.cv_in
    }

    pub fn output_slots(&self) -> u32 {
        self.audio_out + self.cv_out
    }

    pub fn byte_len(&self) -> usize {
        self.shm.len()
    }

    fn slot_ptr(&self, slot: u32) -> *mut f32 {
        let offset = (slot * self.buffer_size) as usize;
        unsafe { (self.shm.as_ptr() as *mut f32).add(offset) }
    }

    /// Copy one input channel into its pool slot. `slot` counts from zero
    /// across `audio_in` then `cv_in`.
    pub fn write_input(&self, slot: u32, data: &[f32]) {
        debug_assert!(slot < self.input_slots());
        let frames = data.len().min(self.buffer_size as usize);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.slot_ptr(slot), frames);
        }
    }

    /// Copy one output channel out of its pool slot. `slot` counts from
    /// zero across `audio_out` then `cv_out`.
    pub fn read_output_into(&self, slot: u32, out: &mut [f32]) {
        debug_assert!(slot < self.output_slots());
        let frames = out.len().min(self.buffer_size as usize);
        let src = self.slot_ptr(self.input_slots() + slot);
        unsafe {
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), frames);
        }
    }

    /// Worker-side accessors: the mirrored view of the same slots.
    pub fn read_input_into(&self, slot: u32, out: &mut [f32]) {
        debug_assert!(slot < self.input_slots());
        let frames = out.len().min(self.buffer_size as usize);
        unsafe {
            std::ptr::copy_nonoverlapping(self.slot_ptr(slot), out.as_mut_ptr(), frames);
        }
    }

    pub fn write_output(&self, slot: u32, data: &[f32]) {
        debug_assert!(slot < self.output_slots());
        let frames = data.len().min(self.buffer_size as usize);
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.slot_ptr(self.input_slots() + slot),
                frames,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_are_six_chars_and_distinct() {
        let a = random_suffix();
        let b = random_suffix();
        assert_eq!(a.len(), 6);
        assert_eq!(b.len(), 6);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn region_names_follow_the_bridge_convention() {
        assert_eq!(
            region_file_name(REGION_RT_CLIENT, "abc123"),
            "plugrack-bridge_shm_rt_abc123"
        );
    }

    #[test]
    fn create_attach_roundtrip() {
        let name = region_file_name(REGION_AUDIO_POOL, &random_suffix());
        let owner = SharedMemory::create(&name, 256).unwrap();
        unsafe { *owner.as_ptr() = 0x5A };
        let peer = SharedMemory::attach(&name).unwrap();
        assert_eq!(peer.len(), 256);
        assert_eq!(unsafe { *peer.as_ptr() }, 0x5A);
    }

    #[test]
    fn pool_slots_do_not_alias() {
        let name = region_file_name(REGION_AUDIO_POOL, &random_suffix());
        let pool = SharedAudioPool::create(&name, 2, 2, 0, 0, 8).unwrap();
        let a: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..8).map(|i| -(i as f32)).collect();
        pool.write_input(0, &a);
        pool.write_input(1, &b);
        pool.write_output(0, &b);
        pool.write_output(1, &a);

        let mut out = vec![0.0f32; 8];
        pool.read_input_into(0, &mut out);
        assert_eq!(out, a);
        pool.read_input_into(1, &mut out);
        assert_eq!(out, b);
        pool.read_output_into(0, &mut out);
        assert_eq!(out, b);
        pool.read_output_into(1, &mut out);
        assert_eq!(out, a);
    }

    #[test]
    fn pool_has_at_least_one_float() {
        let name = region_file_name(REGION_AUDIO_POOL, &random_suffix());
        let pool = SharedAudioPool::create(&name, 0, 0, 0, 0, 0).unwrap();
        assert_eq!(pool.byte_len(), std::mem::size_of::<f32>());
    }
}
