//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};

thread_local!(
    // Scratch buffer reused by every encoder running on this thread.
    pub static TLS_BUF: RefCell<BytesMut> =
        RefCell::new(BytesMut::with_capacity(4096))
);

// Big-endian readers for the field types OSPF packets are made of.
//
// Like the `Buf` getters, these panic when fewer bytes remain than the field
// needs, so callers check lengths first.
pub trait BytesExt: Buf {
    fn get_u24(&mut self) -> u32 {
        self.get_uint(3) as u32
    }

    fn get_ipv4(&mut self) -> Ipv4Addr {
        Ipv4Addr::from(self.get_u32())
    }

    // 0.0.0.0 stands for "no address".
    fn get_opt_ipv4(&mut self) -> Option<Ipv4Addr> {
        Some(self.get_ipv4()).filter(|addr| !addr.is_unspecified())
    }
}

// Big-endian writers matching `BytesExt`.
pub trait BytesMutExt: BufMut {
    // Only the low 24 bits of `n` are written.
    fn put_u24(&mut self, n: u32) {
        self.put_uint(u64::from(n & 0x00ff_ffff), 3);
    }

    fn put_ipv4(&mut self, addr: &Ipv4Addr) {
        self.put_slice(&addr.octets());
    }

    fn put_opt_ipv4(&mut self, addr: &Option<Ipv4Addr>) {
        self.put_ipv4(&addr.unwrap_or(Ipv4Addr::UNSPECIFIED));
    }
}

impl<B: Buf + ?Sized> BytesExt for B {}

impl<B: BufMut + ?Sized> BytesMutExt for B {}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn u24_is_three_bytes() {
        let mut buf = BytesMut::new();
        buf.put_u24(0x01ff_fffe);
        assert_eq!(buf.as_ref(), &[0xff, 0xff, 0xfe]);
        let mut buf = buf.freeze();
        assert_eq!(buf.get_u24(), 0x00ff_fffe);
        assert!(buf.is_empty());
    }

    #[test]
    fn unspecified_addr_is_none() {
        let mut buf = BytesMut::new();
        buf.put_opt_ipv4(&None);
        buf.put_ipv4(&Ipv4Addr::new(10, 0, 0, 1));
        let mut buf: Bytes = buf.freeze();
        assert_eq!(buf.get_opt_ipv4(), None);
        assert_eq!(buf.get_opt_ipv4(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    }
}
