use crate::core::error::Result;

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Clone, Debug)]
pub struct Batch<E> {
    pub index: usize,
    pub entries: Vec<E>,
}

impl<E> Batch<E> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The last batch may be short but is never empty. An upstream error is
/// yielded once and ends the stream.
pub struct Batcher<I> {
    inner: I,
    size: usize,
    index: usize,
    done: bool,
}

impl<I> Batcher<I> {
    pub fn new(inner: I, size: usize) -> Self {
        Self {
            inner,
            size: size.max(1),
            index: 0,
            done: false,
        }
    }
}

impl<I, E> Iterator for Batcher<I>
where
    I: Iterator<Item = Result<E>>,
{
    type Item = Result<Batch<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut entries = Vec::with_capacity(self.size);
        while entries.len() < self.size {
            match self.inner.next() {
                Some(Ok(entry)) => entries.push(entry),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if entries.is_empty() {
            return None;
        }
        let batch = Batch {
            index: self.index,
            entries,
        };
        self.index += 1;
        Some(Ok(batch))
    }
}
