//! Process-wide allocator registry.
//!
//! This binary only ever registers CPU allocators; FPGA stays unregistered so
//! the failure path can be checked regardless of test order.

use tessera_core::{Device, DeviceType, MemConfig};
use tessera_mem::{
    default_cpu_allocator, get_allocator, global_registry, init_allocators, same_allocator,
    set_allocator, Error, Storage,
};

#[test]
fn test_unregistered_device_propagates_not_registered() {
    let err = Storage::create_legacy(Device::of_type(DeviceType::FPGA)).unwrap_err();
    assert!(matches!(
        err,
        Error::NotRegistered {
            device: DeviceType::FPGA
        }
    ));
    assert!(err.is_contract_violation());
    assert!(get_allocator(DeviceType::FPGA).is_err());
    assert!(!global_registry().is_registered(DeviceType::FPGA));
}

#[test]
fn test_create_legacy_on_cpu() {
    set_allocator(DeviceType::CPU, default_cpu_allocator(), 0);
    let s = Storage::create_legacy(Device::cpu()).expect("cpu allocator registered");
    assert_eq!(s.nbytes(), 0);
    assert!(s.resizable());
    assert!(s.data().is_null());
    s.resize(256).unwrap();
    assert_eq!(s.nbytes(), 256);
    assert!(!s.data().is_null());
}

#[test]
fn test_init_from_config_outranks_default() {
    let cfg = MemConfig {
        cpu_allocator_priority: 200,
        zero_fill: true,
        ..Default::default()
    };
    let installed = init_allocators(&cfg).unwrap();
    // Lower-priority registrations from other tests can no longer displace it.
    set_allocator(DeviceType::CPU, default_cpu_allocator(), 0);
    assert!(same_allocator(get_allocator(DeviceType::CPU).unwrap(), installed));
    assert_eq!(global_registry().priority(DeviceType::CPU), 200);
}
