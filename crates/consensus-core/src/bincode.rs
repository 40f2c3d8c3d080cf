use bincode::config;

pub const STANDARD_LIMIT_16M: usize = 0x100_0000;
pub const STD_BINCODE_CONFIG: config::Configuration<
    config::BigEndian,
    config::Varint,
    config::Limit<STANDARD_LIMIT_16M>,
> = config::standard()
    .with_limit::<STANDARD_LIMIT_16M>()
    .with_big_endian()
    .with_variable_int_encoding();

/// Encoding used for everything that gets hashed or signed
///
/// Must never change, or hashes (and so signatures and sortition priorities)
/// stop matching between validators.
pub const CONSENSUS_BINCODE_CONFIG: config::Configuration<
    config::BigEndian,
    config::Varint,
    config::Limit<STANDARD_LIMIT_16M>,
> = STD_BINCODE_CONFIG;
