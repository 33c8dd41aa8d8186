//! Block-data framing for hook-written primitives
//!
//! Inside a write hook, primitive data is collected and emitted as
//! length-prefixed blocks so the reader can find the end of the hook's data
//! without understanding it. Objects interrupt a block; the hook's data is
//! closed by an end marker.

use crate::protocol::{
    BLOCK_FLUSH_THRESHOLD, ID_START_BLOCK_LARGE, ID_START_BLOCK_MEDIUM, ID_START_BLOCK_SMALL,
};
use rivet_io::{DataInput, DataOutput, StreamError};

/// Pending block bytes of a marshaller
#[derive(Debug, Default)]
pub(crate) struct BlockWriter {
    pub(crate) active: bool,
    buf: Vec<u8>,
}

impl BlockWriter {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn is_full(&self) -> bool {
        self.buf.len() >= BLOCK_FLUSH_THRESHOLD
    }

    /// Emit pending bytes as one block
    pub(crate) fn flush_to(&mut self, out: &mut DataOutput) -> Result<(), StreamError> {
        let len = self.buf.len();
        if len == 0 {
            return Ok(());
        }
        if len <= 0xFF {
            out.write_u8(ID_START_BLOCK_SMALL)?;
            out.write_u8(len as u8)?;
        } else if len <= 0xFFFF {
            out.write_u8(ID_START_BLOCK_MEDIUM)?;
            out.write_u16(len as u16)?;
        } else {
            out.write_u8(ID_START_BLOCK_LARGE)?;
            out.write_i32(len as i32)?;
        }
        out.write_bytes(&self.buf)?;
        self.buf.clear();
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.active = false;
        self.buf.clear();
    }
}

/// Block position of an unmarshaller
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub(crate) struct BlockState {
    /// Primitive reads are served from block data
    pub(crate) active: bool,
    /// Bytes left in the current block
    pub(crate) remaining: usize,
    /// The end marker has been consumed, or there never was one
    pub(crate) ended: bool,
}

impl BlockState {
    /// State for a hook whose data is framed as blocks
    pub(crate) fn framed() -> Self {
        Self {
            active: true,
            remaining: 0,
            ended: false,
        }
    }

    /// State for a read hook over data written without a hook: no block
    /// data at all, so primitive reads hit the end immediately
    pub(crate) fn exhausted() -> Self {
        Self {
            active: true,
            remaining: 0,
            ended: true,
        }
    }
}

/// Length of the block a start tag introduces, or `None` for other tags
pub(crate) fn read_block_length(tag: u8, input: &mut DataInput) -> Result<Option<usize>, StreamError> {
    let len = match tag {
        ID_START_BLOCK_SMALL => input.read_u8()? as usize,
        ID_START_BLOCK_MEDIUM => input.read_u16()? as usize,
        ID_START_BLOCK_LARGE => input.read_i32()? as u32 as usize,
        _ => return Ok(None),
    };
    Ok(Some(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivet_io::{ByteArrayInput, SharedByteOutput};

    #[test]
    fn test_block_sizes_pick_header_width() {
        let sink = SharedByteOutput::new();
        let mut out = DataOutput::new(64);
        out.start(Box::new(sink.clone()));
        let mut block = BlockWriter::default();
        block.push(&[7; 3]);
        block.flush_to(&mut out).unwrap();
        block.push(&vec![1; 300]);
        assert!(!block.is_full());
        block.flush_to(&mut out).unwrap();
        block.flush_to(&mut out).unwrap();
        out.flush().unwrap();

        let bytes = sink.bytes();
        assert_eq!(&bytes[..2], &[ID_START_BLOCK_SMALL, 3]);
        assert_eq!(&bytes[5..8], &[ID_START_BLOCK_MEDIUM, 0x01, 0x2c]);
        assert_eq!(bytes.len(), 2 + 3 + 3 + 300);

        let mut input = DataInput::new(16);
        input.start(Box::new(ByteArrayInput::new(bytes)));
        let tag = input.read_u8().unwrap();
        assert_eq!(read_block_length(tag, &mut input).unwrap(), Some(3));
        input.skip_fully(3).unwrap();
        let tag = input.read_u8().unwrap();
        assert_eq!(read_block_length(tag, &mut input).unwrap(), Some(300));
        assert_eq!(read_block_length(0x05, &mut input).unwrap(), None);
    }
}
