use crate::msg::size_of_szx;

/// Slice the block `num` of size `2^(szx + 4)` out of `body`,
/// along with whether more blocks follow it.
///
/// Yields `None` when the block starts past the end of the body.
/// An empty body consists of exactly one empty block.
///
/// ```
/// use toad_exchange::exchange::block::split;
///
/// let body = [0u8; 40];
/// assert_eq!(split(&body, 0, 0).map(|(b, more)| (b.len(), more)), Some((16, true)));
/// assert_eq!(split(&body, 2, 0).map(|(b, more)| (b.len(), more)), Some((8, false)));
/// assert_eq!(split(&body, 3, 0), None);
/// ```
pub fn split(body: &[u8], num: u32, szx: u8) -> Option<(&[u8], bool)> {
  let size = size_of_szx(szx);
  let offset = num as usize * size;

  if body.is_empty() && num == 0 {
    return Some((body, false));
  }

  if offset >= body.len() {
    return None;
  }

  let end = (offset + size).min(body.len());
  Some((&body[offset..end], end < body.len()))
}

/// Per-direction fragmentation bookkeeping owned by one exchange.
///
/// On the receiving side, blocks are appended in order as they arrive.
/// On the producing side, the full body is kept & blocks are sliced
/// out of it by offset, so that the block size may shrink mid-transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockwiseStatus {
  /// Number of the block most recently sent or received
  pub num: u32,
  /// Size exponent currently in use
  pub szx: u8,
  /// Whether the last block has been sent or received
  pub complete: bool,
  /// Content-Format of the body
  pub content_format: Option<u16>,
  /// Observe sequence number of the notification being transferred
  pub observe: Option<u32>,
  /// Whether the server drives this transfer by sending
  /// CON blocks (block1 upload answered by a large response)
  pub push: bool,
  blocks: Vec<Vec<u8>>,
  body: Vec<u8>,
}

impl BlockwiseStatus {
  /// Bookkeeping for a body we are receiving
  pub fn receiving(szx: u8) -> Self {
    Self { num: 0,
           szx,
           complete: false,
           content_format: None,
           observe: None,
           push: false,
           blocks: vec![],
           body: vec![] }
  }

  /// Bookkeeping for a body we are producing
  pub fn sending(body: Vec<u8>, szx: u8) -> Self {
    Self { body,
           ..Self::receiving(szx) }
  }

  /// Size of the current block size, in bytes
  pub fn size(&self) -> usize {
    size_of_szx(self.szx)
  }

  /// Number of bytes received so far
  pub fn received(&self) -> usize {
    self.blocks.iter().map(Vec::len).sum()
  }

  /// Blocks received so far, in order
  pub fn blocks(&self) -> &[Vec<u8>] {
    &self.blocks
  }

  /// Record a received block
  pub fn append(&mut self, num: u32, szx: u8, bytes: &[u8]) {
    self.num = num;
    self.szx = szx;
    self.blocks.push(bytes.to_vec());
  }

  /// Concatenate all blocks received so far
  pub fn assemble(&self) -> Vec<u8> {
    self.blocks.concat()
  }

  /// The full body being produced
  pub fn body(&self) -> &[u8] {
    &self.body
  }

  /// Slice block `num` of the body being produced
  pub fn block(&self, num: u32, szx: u8) -> Option<(Vec<u8>, bool)> {
    split(&self.body, num, szx).map(|(b, more)| (b.to_vec(), more))
  }

  /// Byte offset of the block following the current one
  pub fn next_offset(&self) -> usize {
    (self.num as usize + 1) * self.size()
  }
}

/// Rescale a byte offset to a block number in a (possibly smaller) size exponent
pub fn num_at_offset(offset: usize, szx: u8) -> u32 {
  (offset / size_of_szx(szx)) as u32
}

#[cfg(test)]
mod test {
  use super::*;

  fn roundtrip(len: usize, szx: u8) -> (Vec<u8>, u32) {
    let body = (0..len).map(|n| (n % 251) as u8).collect::<Vec<_>>();
    let producer = BlockwiseStatus::sending(body, szx);
    let mut receiver = BlockwiseStatus::receiving(szx);

    let mut num = 0;
    loop {
      let (block, more) = producer.block(num, szx).unwrap();
      assert_eq!(num_at_offset(receiver.received(), szx), num);
      receiver.append(num, szx, &block);
      if !more {
        break;
      }
      num += 1;
    }

    (receiver.assemble(), num + 1)
  }

  #[test]
  fn split_and_reassemble_preserves_body() {
    for szx in [0u8, 2, 6] {
      let bs = size_of_szx(szx);
      for len in [0, 1, bs - 1, bs, bs + 1, 10 * bs] {
        let (body, blocks) = roundtrip(len, szx);
        assert_eq!(body.len(), len, "szx {} len {}", szx, len);
        assert_eq!(body,
                   (0..len).map(|n| (n % 251) as u8).collect::<Vec<_>>());
        assert_eq!(blocks as usize, (len.max(1) + bs - 1) / bs);
      }
    }
  }

  #[test]
  fn renegotiated_offsets() {
    // 3 blocks of 64 are 12 blocks of 16
    assert_eq!(num_at_offset(3 * 64, 0), 12);
    let status = BlockwiseStatus { num: 2,
                                   ..BlockwiseStatus::receiving(2) };
    assert_eq!(status.next_offset(), 192);
  }
}
