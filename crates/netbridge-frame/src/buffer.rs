use bytes::Bytes;

/// Fixed-size byte region with independent read and write cursors.
///
/// All integers are little-endian. Every accessor checks that the cursor plus
/// the width of the value stays within the buffer and panics otherwise: an
/// overrun here means the framing code computed a size wrong, which must not
/// be papered over by truncating. Callers decoding untrusted input check the
/// length before handing the bytes to a `WireBuffer`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireBuffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

macro_rules! int_accessors {
    ($read:ident, $write:ident, $ty:ty) => {
        #[doc = concat!("Read a little-endian `", stringify!($ty), "` and advance the read cursor.")]
        pub fn $read(&mut self) -> $ty {
            <$ty>::from_le_bytes(self.read_array())
        }

        #[doc = concat!("Write a little-endian `", stringify!($ty), "` and advance the write cursor.")]
        pub fn $write(&mut self, value: $ty) {
            self.write_bytes(&value.to_le_bytes());
        }
    };
}

impl WireBuffer {
    /// A zero-filled buffer of `size` bytes, ready for writing.
    pub fn with_size(size: usize) -> Self {
        Self {
            buf: vec![0; size],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Wrap received bytes for reading. The write cursor sits at the end.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        let write_pos = buf.len();
        Self {
            buf,
            read_pos: 0,
            write_pos,
        }
    }

    int_accessors!(read_u16, write_u16, u16);
    int_accessors!(read_u32, write_u32, u32);
    int_accessors!(read_u64, write_u64, u64);
    int_accessors!(read_i32, write_i32, i32);
    int_accessors!(read_i64, write_i64, i64);

    /// Read one byte.
    pub fn read_u8(&mut self) -> u8 {
        self.read_array::<1>()[0]
    }

    /// Write one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    /// Read exactly `N` bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N));
        out
    }

    /// Borrow the next `len` bytes and advance the read cursor past them.
    pub fn read_bytes(&mut self, len: usize) -> &[u8] {
        let start = self.read_pos;
        let end = Self::checked_end(start, len, self.buf.len(), "read");
        self.read_pos = end;
        &self.buf[start..end]
    }

    /// Copy `bytes` in at the write cursor.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let start = self.write_pos;
        let end = Self::checked_end(start, bytes.len(), self.buf.len(), "write");
        self.buf[start..end].copy_from_slice(bytes);
        self.write_pos = end;
    }

    /// Overwrite bytes at an absolute offset without moving either cursor.
    pub fn patch_bytes(&mut self, offset: usize, bytes: &[u8]) {
        let end = Self::checked_end(offset, bytes.len(), self.buf.len(), "patch");
        self.buf[offset..end].copy_from_slice(bytes);
    }

    fn checked_end(pos: usize, len: usize, size: usize, op: &str) -> usize {
        match pos.checked_add(len) {
            Some(end) if end <= size => end,
            _ => panic!("wire buffer {op} overrun: cursor {pos} + {len} bytes exceeds size {size}"),
        }
    }

    /// Shrink the buffer to exactly the bytes written so far.
    pub fn trim(&mut self) {
        self.buf.truncate(self.write_pos);
        self.buf.shrink_to_fit();
        self.read_pos = self.read_pos.min(self.write_pos);
    }

    /// Move the contents out, leaving this buffer empty with both cursors at zero.
    pub fn take(&mut self) -> WireBuffer {
        std::mem::take(self)
    }

    /// Total capacity in bytes.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    /// Bytes left between the read cursor and the end of the buffer.
    pub fn remaining_read(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    /// Bytes left between the write cursor and the end of the buffer.
    pub fn remaining_write(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    /// The whole buffer, written or not.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// The bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.write_pos]
    }

    /// Trim and convert into an immutable, cheaply cloneable buffer.
    pub fn into_bytes(mut self) -> Bytes {
        self.trim();
        Bytes::from(self.buf)
    }
}
