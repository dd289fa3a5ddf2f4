#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use purse_core::{
    crc16, decode_signed, decode_unsigned_dual, encode_unsigned_dual, AccountRecord, MAX_BALANCE,
};

#[derive(Debug, Arbitrary)]
struct Input {
    bytes: [u8; 32],
    page: u8,
    balance: u32,
    transaction_id: u16,
}

fuzz_target!(|input: Input| {
    let page = input.page & 0x0F;
    let record = AccountRecord::new(input.bytes);

    if let Ok(view) = decode_signed(&record, page) {
        assert!(view.balance <= MAX_BALANCE);
        assert_eq!(crc16::crc16(u16::from(page), &record.0), crc16::CRC16_RESIDUE);
    }

    if let Ok(view) = decode_unsigned_dual(&record, page) {
        assert!(view.balance <= MAX_BALANCE);

        // The canonical record always decodes to the same view without repair
        let again = decode_unsigned_dual(&view.canonical, page).unwrap();
        assert_eq!(again.balance, view.balance);
        assert_eq!(again.slot, view.slot);
        assert!(!again.needs_repair);

        // Writing on top of any valid record keeps the old balance as fallback
        let balance = input.balance % (MAX_BALANCE + 1);
        let (next, slot) =
            encode_unsigned_dual(&view.canonical, balance, input.transaction_id, page).unwrap();
        assert_eq!(slot, view.slot.other());
        let decoded = decode_unsigned_dual(&next, page).unwrap();
        assert_eq!(decoded.balance, balance);
        assert_eq!(decoded.transaction_id, input.transaction_id);
    }
});
