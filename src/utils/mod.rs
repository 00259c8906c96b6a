pub mod time;

/// Random url-safe identifier used for runs, records and runner instances.
pub fn longid() -> String {
    nanoid::nanoid!()
}
