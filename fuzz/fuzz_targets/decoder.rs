#![no_main]

use dotcapture::boxing::{ParameterBoxingInstruction, SignatureDecoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(instructions) = SignatureDecoder::new().decode_blob(data) else {
        return;
    };

    for instruction in instructions {
        if let ParameterBoxingInstruction::TypeSpecification { offset, length } = instruction {
            assert!(length > 0);
            assert!(offset + length <= data.len());
        }
    }
});
