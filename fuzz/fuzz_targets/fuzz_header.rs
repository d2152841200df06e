#![no_main]

use flatdex::spec::header::{AimHeader, IndexFormat, IsiHeader, IsiPointers, StoredHeader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Header decoding must reject damaged blocks without panicking
    for format in [IndexFormat::Isi, IndexFormat::Aim] {
        let Ok(mut stored) = StoredHeader::from_bytes(data.to_vec(), format) else {
            continue;
        };
        let _ = stored.stored_arguments();
        let _ = stored.require_reindexable();
        match format {
            IndexFormat::Isi => {
                let _ = IsiHeader::decode(stored.as_bytes());
                let _ = IsiPointers::decode(stored.as_bytes());
            }
            IndexFormat::Aim => {
                let _ = AimHeader::decode(stored.as_bytes());
            }
        }
        let _ = stored.rename("renamed.dat", true);
    }
});
