// Required by `cargo pgrx schema`: linking this binary against the
// extension crate is enough to run the `#[pg_extern]`/`#[pg_schema]`
// inventory collection pgrx uses to generate `cdcsync--*.sql`.
fn main() {}
