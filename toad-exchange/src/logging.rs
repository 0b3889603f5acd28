use core::fmt::Write;

use crate::msg::{Message, MessageExt, MessageOptions};

/// Render a one-line summary of a message
///
/// ```
/// use toad_exchange::logging::msg_summary;
/// use toad_exchange::msg::{Id, Message, MessageExt, Type};
///
/// let msg = Message::empty(Type::Ack, Id(12));
/// assert_eq!(msg_summary(&msg), "Ack 0.00 id=12 token=[] with 0 byte payload");
/// ```
pub fn msg_summary(msg: &Message) -> String {
  let mut buf = String::new();

  write!(buf,
         "{:?} {} id={} token={:?}",
         msg.ty,
         msg.code.to_string(),
         msg.id.0,
         msg.token.as_bytes()).ok();

  [("block1", msg.block1()), ("block2", msg.block2())].into_iter()
                                                      .filter_map(|(n, b)| b.map(|b| (n, b)))
                                                      .for_each(|(name, b)| {
                                                        write!(buf,
                                                               " {}={}/{}/{}",
                                                               name,
                                                               b.num(),
                                                               b.more() as u8,
                                                               b.size()).ok();
                                                      });

  if let Some(seq) = msg.observe_seq() {
    write!(buf, " observe={}", seq).ok();
  }

  write!(buf, " with {} byte payload", msg.payload.0.len()).ok();
  buf
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::msg::{Code, Id, Token, TokenExt, Type};

  #[test]
  fn summary_includes_blocks() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(3), Token::from_slice(&[1, 2]));
    msg.set_block2(64, 2, true).ok();

    assert_eq!(msg_summary(&msg),
               "Con 0.01 id=3 token=[1, 2] block2=2/1/64 with 0 byte payload");
  }
}
