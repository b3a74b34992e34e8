#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::xdp_action,
    macros::{map, xdp},
    maps::{LruHashMap, PerCpuArray},
    programs::XdpContext,
};
use core::mem;
use network_types::{
    eth::{EthHdr, EtherType},
    ip::Ipv4Hdr,
};

/// Slot indices in the `stats` array. Must match the userspace loader.
const STAT_TOTAL: u32 = 0;
const STAT_BLOCKED: u32 = 1;

const MAX_ADDRS: u32 = 10_000;

/// Blocked IPv4 addresses with per-address drop counters.
///
/// Key: address in network byte order, exactly as it appears in the IP
/// header, so the lookup needs no byte swap on the fast path. The LRU map
/// type evicts cold entries under pressure instead of rejecting inserts.
#[map]
#[allow(non_upper_case_globals)]
static block_set: LruHashMap<u32, u64> = LruHashMap::with_max_entries(MAX_ADDRS, 0);

/// Whitelisted IPv4 addresses. Presence here wins over `block_set`.
#[map]
#[allow(non_upper_case_globals)]
static allow_set: LruHashMap<u32, u8> = LruHashMap::with_max_entries(MAX_ADDRS, 0);

/// Aggregate packet counters, one slot per index above. Per-CPU slots keep
/// increments race-free; userspace sums across CPUs on read.
#[map]
#[allow(non_upper_case_globals)]
static stats: PerCpuArray<u64> = PerCpuArray::with_max_entries(2, 0);

#[xdp]
pub fn xdp_blocker(ctx: XdpContext) -> u32 {
    match try_xdp_blocker(&ctx) {
        Ok(action) => action,
        // Truncated or otherwise unparsable packets are the next hook's
        // problem, never ours to drop.
        Err(()) => xdp_action::XDP_PASS,
    }
}

#[inline(always)]
fn bump_stat(index: u32) {
    if let Some(counter) = stats.get_ptr_mut(index) {
        unsafe { *counter += 1 };
    }
}

/// Bounds-checked pointer into packet data. The explicit comparison against
/// `data_end` before the cast is the form the BPF verifier accepts.
#[inline(always)]
fn ptr_at<T>(ctx: &XdpContext, offset: usize) -> Result<*const T, ()> {
    let start = ctx.data();
    let end = ctx.data_end();
    let len = mem::size_of::<T>();
    if start + offset + len > end {
        return Err(());
    }
    Ok((start + offset) as *const T)
}

fn try_xdp_blocker(ctx: &XdpContext) -> Result<u32, ()> {
    bump_stat(STAT_TOTAL);

    let eth = ptr_at::<EthHdr>(ctx, 0)?;
    if unsafe { (*eth).ether_type } != EtherType::Ipv4 {
        return Ok(xdp_action::XDP_PASS);
    }

    let ipv4 = ptr_at::<Ipv4Hdr>(ctx, EthHdr::LEN)?;
    // Raw header fields, network byte order.
    let src = unsafe { (*ipv4).src_addr };
    let dst = unsafe { (*ipv4).dst_addr };

    // Allow-precedence: a whitelisted endpoint on either side means the
    // packet cannot be dropped, so these lookups come first.
    if unsafe { allow_set.get(&dst) }.is_some() || unsafe { allow_set.get(&src) }.is_some() {
        return Ok(xdp_action::XDP_PASS);
    }

    if let Some(drops) = block_set.get_ptr_mut(&dst) {
        unsafe { *drops += 1 };
        bump_stat(STAT_BLOCKED);
        return Ok(xdp_action::XDP_DROP);
    }
    if let Some(drops) = block_set.get_ptr_mut(&src) {
        unsafe { *drops += 1 };
        bump_stat(STAT_BLOCKED);
        return Ok(xdp_action::XDP_DROP);
    }

    Ok(xdp_action::XDP_PASS)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
