pub mod bit;
pub mod cfg;

/// All input channels of a 16-channel card, in order.
pub const CHAN16: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
