//! CMYK fill colors for text elements.

use lopdf::content::Operation;

use crate::error::{Error, Result};

/// A DeviceCMYK color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cmyk {
    pub c: f32,
    pub m: f32,
    pub y: f32,
    pub k: f32,
}

impl Cmyk {
    /// Parse a `"c,m,y,k"` string with components on a 0-100 scale.
    pub fn parse(value: &str) -> Result<Self> {
        let components = value
            .split(',')
            .map(|part| part.trim().parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::InvalidColor(value.to_string()))?;

        let [c, m, y, k] = components[..] else {
            return Err(Error::InvalidColor(value.to_string()));
        };
        if [c, m, y, k].iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidColor(value.to_string()));
        }

        let unit = |v: f32| (v / 100.0).clamp(0.0, 1.0);
        Ok(Self {
            c: unit(c),
            m: unit(m),
            y: unit(y),
            k: unit(k),
        })
    }

    /// The non-stroking `k` operator selecting this color.
    pub fn fill_operation(self) -> Operation {
        Operation::new(
            "k",
            vec![self.c.into(), self.m.into(), self.y.into(), self.k.into()],
        )
    }
}
