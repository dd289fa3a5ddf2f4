//! Challenge-response authentication across both coprocessor backends

use purse_copr::{EmulatedCoprocessor, HardwareCoprocessor, LoopbackDevice};
use purse_core::sha::install_master_secret;
use purse_core::{
    BindCode, BindData, Challenge, CoprocessorIdentity, MemoryToken, Scratchpad, ServiceInfo,
    TokenAddress, TokenFamily, UserToken,
};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;

const COPR_ADDRESS: [u8; 8] = [0x18, 0xC0, 0xFF, 0xEE, 0, 0, 0, 0x42];

fn service() -> ServiceInfo {
    ServiceInfo {
        bind_data: BindData::new([0x3C; 32]),
        bind_code: BindCode::new([0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03]),
        signing_challenge: Challenge::new([0x03, 0x0A, 0x0F]),
        ..Default::default()
    }
}

fn emulator() -> EmulatedCoprocessor {
    EmulatedCoprocessor::new(
        service(),
        TokenAddress::new(COPR_ADDRESS),
        b"signing material",
        b"authentication material",
        ChaCha20Rng::seed_from_u64(11),
    )
    .unwrap()
}

fn hardware() -> HardwareCoprocessor<LoopbackDevice> {
    let svc = service();
    let mut device = LoopbackDevice::new(TokenAddress::new(COPR_ADDRESS));
    device.install_secret(svc.sign_page, install_master_secret(b"signing material").unwrap());
    device.install_secret(
        svc.auth_page,
        install_master_secret(b"authentication material").unwrap(),
    );
    HardwareCoprocessor::new(device, svc).unwrap()
}

fn token(family: TokenFamily, page: u8) -> MemoryToken {
    let address = TokenAddress::new([family.family_code(), 0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70]);
    let master = install_master_secret(b"authentication material").unwrap();
    MemoryToken::provision(family, address, page, &master, &service()).unwrap()
}

/// Rebuild the scratchpad the token used for its authenticated read
fn auth_scratchpad(token: &MemoryToken, challenge: &Challenge, counter: Option<u32>) -> Scratchpad {
    let mut pad = Scratchpad::erased();
    pad.set_write_counter(counter);
    let page = token.account_page();
    pad.0[12] = match token.family() {
        TokenFamily::Ds1963S => page & 0x0F,
        TokenFamily::Ds1961S => (page & 0x3F) | 0x40,
    };
    pad.0[13..20].copy_from_slice(&token.address().serial7());
    pad.set_challenge(challenge);
    pad
}

fn authenticates(copr: &dyn CoprocessorIdentity, family: TokenFamily, page: u8) -> bool {
    let mut token = token(family, page);
    token.set_data(&purse_core::AccountRecord::new([0x5A; 32]));
    let challenge = copr.generate_challenge(0).unwrap();
    let read = token.read_authenticated(&challenge).unwrap();
    let pad = auth_scratchpad(&token, &challenge, read.write_counter);
    let full = token.full_bind_code(&copr.service().bind_code);
    copr.verify_authentication(&full, &read.record.0, &pad, &read.mac, token.auth_command())
        .unwrap()
}

#[test]
fn test_emulator_authenticates_both_families() {
    let copr = emulator();
    assert!(authenticates(&copr, TokenFamily::Ds1963S, 9));
    assert!(authenticates(&copr, TokenFamily::Ds1963S, 3));
    assert!(authenticates(&copr, TokenFamily::Ds1961S, 0));
}

#[test]
fn test_hardware_authenticates_both_families() {
    let copr = hardware();
    assert!(authenticates(&copr, TokenFamily::Ds1963S, 9));
    assert!(authenticates(&copr, TokenFamily::Ds1961S, 2));
}

#[test]
fn test_foreign_token_rejected() {
    let copr = emulator();
    let address = TokenAddress::new([0x18, 1, 1, 1, 1, 1, 1, 1]);
    let master = install_master_secret(b"some other service").unwrap();
    let mut token = MemoryToken::provision(TokenFamily::Ds1963S, address, 9, &master, &service()).unwrap();

    let challenge = copr.generate_challenge(0).unwrap();
    let read = token.read_authenticated(&challenge).unwrap();
    let pad = auth_scratchpad(&token, &challenge, read.write_counter);
    let full = token.full_bind_code(&copr.service().bind_code);
    assert!(!copr
        .verify_authentication(&full, &read.record.0, &pad, &read.mac, token.auth_command())
        .unwrap());
}

#[test]
fn test_stale_challenge_rejected() {
    let copr = emulator();
    let mut token = token(TokenFamily::Ds1963S, 9);
    let challenge = copr.generate_challenge(0).unwrap();
    let read = token.read_authenticated(&challenge).unwrap();

    let mut other = challenge.0;
    other[0] ^= 0xFF;
    let pad = auth_scratchpad(&token, &Challenge::new(other), read.write_counter);
    let full = token.full_bind_code(&copr.service().bind_code);
    assert!(!copr
        .verify_authentication(&full, &read.record.0, &pad, &read.mac, token.auth_command())
        .unwrap());
}

#[test]
fn test_shared_emulator_across_threads() {
    let copr = std::sync::Arc::new(emulator());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let copr = copr.clone();
            std::thread::spawn(move || authenticates(&*copr, TokenFamily::Ds1963S, 8 + i))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
}
