use std::ptr::NonNull;
use std::sync::Mutex;

use dma_api::{Impl, set_impl};
use meson_sdmmc::{Direction, DmaOps, sd_emmc::desc::Descriptor, sd_emmc::dma::DVecDma};

static INVALIDATED: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());
static FLUSHED: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());

struct IdentityMap;

impl Impl for IdentityMap {
    fn map(addr: NonNull<u8>, _size: usize, _direction: Direction) -> u64 {
        addr.as_ptr() as usize as u64
    }

    fn unmap(_addr: NonNull<u8>, _size: usize) {}

    fn flush(addr: NonNull<u8>, size: usize) {
        FLUSHED.lock().unwrap().push((addr.as_ptr() as usize, size));
    }

    fn invalidate(addr: NonNull<u8>, size: usize) {
        INVALIDATED.lock().unwrap().push((addr.as_ptr() as usize, size));
    }
}

set_impl!(IdentityMap);

fn covers(log: &Mutex<Vec<(usize, usize)>>, addr: usize) -> bool {
    log.lock()
        .unwrap()
        .iter()
        .any(|&(start, size)| addr >= start && addr < start + size)
}

#[test]
fn test_read_desc_sees_device_write_back() {
    let mut dma = DVecDma::new().unwrap();
    let desc = Descriptor::from_words([0x8000_0211, 0x1000, 0, 0]);
    dma.write_desc(&[desc]);

    let resp_word = dma.desc_bus_addr() as usize + 12;
    assert!(covers(&FLUSHED, resp_word), "descriptor not flushed to the device");

    // controller stores R1 in place of the response address
    unsafe { (resp_word as *mut u32).write_volatile(0x900) };

    let back = dma.read_desc(0);
    assert!(
        covers(&INVALIDATED, resp_word),
        "read_desc did not invalidate the written back response"
    );
    assert_eq!(back.resp_addr, 0x900);
    assert_eq!(back.cmd_arg, 0x1000);
}

#[test]
fn test_bounce_and_staged_copies() {
    let mut dma = DVecDma::new().unwrap();
    let src: Vec<u8> = (0..64u8).collect();
    dma.copy_to_bounce(&src);
    let mut dst = vec![0u8; 64];
    dma.copy_from_bounce(&mut dst);
    assert_eq!(dst, src);

    let mut buf = vec![0u8; 512];
    let segs = dma.map_sg(&buf, Direction::FromDevice).unwrap();
    assert_eq!(segs.len(), 1);
    assert_eq!(segs[0].len, 512);
    unsafe { (segs[0].bus_addr as usize as *mut u8).add(7).write_volatile(0x5a) };
    dma.unmap_sg(&mut buf, Direction::FromDevice);
    assert_eq!(buf[7], 0x5a);
}
