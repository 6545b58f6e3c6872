use crate::value::Value;
use parking_lot::RwLock;

pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Columnar value storage for one column, partitioned into blocks.
///
/// Rows are addressed by a storage handle; handle `h` lives in block
/// `h >> shift` at offset `h & mask`. Blocks are allocated on first write.
#[derive(Debug)]
pub struct Pull {
    inner: RwLock<PullBlocks>,
}

#[derive(Debug)]
struct PullBlocks {
    shift: u32,
    blocks: Vec<Option<Box<[Value]>>>,
}

impl PullBlocks {
    fn block_size(&self) -> usize {
        1 << self.shift
    }

    fn locate(&self, handle: usize) -> (usize, usize) {
        (handle >> self.shift, handle & (self.block_size() - 1))
    }
}

/// Round a requested block size up to the next power of two.
pub fn normalize_block_size(size: usize) -> usize {
    size.max(1).next_power_of_two()
}

impl Pull {
    pub fn new(block_size: usize) -> Self {
        Pull {
            inner: RwLock::new(PullBlocks {
                shift: normalize_block_size(block_size).trailing_zeros(),
                blocks: Vec::new(),
            }),
        }
    }

    pub fn block_size(&self) -> usize {
        self.inner.read().block_size()
    }

    /// Number of allocated blocks.
    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.iter().filter(|b| b.is_some()).count()
    }

    pub fn get(&self, handle: usize) -> Value {
        let inner = self.inner.read();
        let (block, offset) = inner.locate(handle);
        inner
            .blocks
            .get(block)
            .and_then(|b| b.as_ref())
            .map(|b| b[offset].clone())
            .unwrap_or(Value::Null)
    }

    /// Store a value, returning the previous one.
    pub fn set(&self, handle: usize, value: Value) -> Value {
        let mut inner = self.inner.write();
        let size = inner.block_size();
        let (block, offset) = inner.locate(handle);
        if inner.blocks.len() <= block {
            if value.is_null() {
                return Value::Null;
            }
            inner.blocks.resize_with(block + 1, || None);
        }
        let slot = &mut inner.blocks[block];
        if slot.is_none() {
            if value.is_null() {
                return Value::Null;
            }
            *slot = Some(vec![Value::Null; size].into_boxed_slice());
        }
        match slot {
            Some(b) => std::mem::replace(&mut b[offset], value),
            None => Value::Null,
        }
    }

    pub fn clear(&self, handle: usize) {
        self.set(handle, Value::Null);
    }

    /// Re-partition the storage with a new block size, keeping every value.
    pub fn set_block_size(&self, block_size: usize) {
        let block_size = normalize_block_size(block_size);
        let mut inner = self.inner.write();
        if inner.block_size() == block_size {
            return;
        }
        let old_size = inner.block_size();
        let old = std::mem::take(&mut inner.blocks);
        inner.shift = block_size.trailing_zeros();
        let mut repartitioned = PullBlocks {
            shift: inner.shift,
            blocks: Vec::new(),
        };
        for (index, block) in old.into_iter().enumerate() {
            let Some(block) = block else { continue };
            for (offset, value) in block.into_vec().into_iter().enumerate() {
                if value.is_null() {
                    continue;
                }
                let handle = index * old_size + offset;
                let (b, o) = repartitioned.locate(handle);
                if repartitioned.blocks.len() <= b {
                    repartitioned.blocks.resize_with(b + 1, || None);
                }
                let slot = repartitioned.blocks[b]
                    .get_or_insert_with(|| vec![Value::Null; block_size].into_boxed_slice());
                slot[o] = value;
            }
        }
        *inner = repartitioned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let pull = Pull::new(4);
        assert_eq!(pull.get(10), Value::Null);
        assert_eq!(pull.set(10, Value::Int(5)), Value::Null);
        assert_eq!(pull.set(10, Value::Int(6)), Value::Int(5));
        assert_eq!(pull.get(10), Value::Int(6));
        assert_eq!(pull.block_count(), 1);
    }

    #[test]
    fn test_null_write_does_not_allocate() {
        let pull = Pull::new(8);
        pull.clear(100);
        assert_eq!(pull.block_count(), 0);
    }

    #[test]
    fn test_block_size_rounds_to_power_of_two() {
        let pull = Pull::new(100);
        assert_eq!(pull.block_size(), 128);
        assert_eq!(normalize_block_size(0), 1);
    }

    #[test]
    fn test_repartition_keeps_values() {
        let pull = Pull::new(4);
        for h in 0..20 {
            pull.set(h, Value::Int(h as i64));
        }
        pull.set_block_size(16);
        assert_eq!(pull.block_size(), 16);
        assert_eq!(pull.block_count(), 2);
        for h in 0..20 {
            assert_eq!(pull.get(h), Value::Int(h as i64));
        }
    }
}
