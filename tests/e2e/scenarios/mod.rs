mod locking;
mod round_trip;
mod swap_watermarks;
