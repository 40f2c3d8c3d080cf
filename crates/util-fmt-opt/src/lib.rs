// SPDX-License-Identifier: MIT

use std::fmt;

/// Display an `Option<T: Display>` as either the value or `-`
pub trait AsFmtOption {
    type Fmt: fmt::Display;

    fn fmt_option(self) -> Self::Fmt;
}

pub struct FmtOption<T>(Option<T>);

impl<T> fmt::Display for FmtOption<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(t) => t.fmt(f),
            None => f.write_str("-"),
        }
    }
}

impl<T> AsFmtOption for Option<T>
where
    T: fmt::Display,
{
    type Fmt = FmtOption<T>;

    fn fmt_option(self) -> Self::Fmt {
        FmtOption(self)
    }
}

#[test]
fn fmt_option_sanity() {
    assert_eq!(Some(3).fmt_option().to_string(), "3");
    assert_eq!(None::<u8>.fmt_option().to_string(), "-");
}
