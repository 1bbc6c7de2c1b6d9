//! String properties of a [`Single`] handle.
//!
//! | Name | Access | Value |
//! |------|--------|-------|
//! | `input`, `output` | rw, ro | dimensions, `d0:d1:...` per tensor joined by `,` |
//! | `inputtype`, `outputtype` | rw, ro | element types joined by `,` |
//! | `inputname`, `outputname` | rw | tensor names joined by `,` |
//! | `inputlayout`, `outputlayout` | rw | `any`, `nchw` or `nhwc` per tensor |
//! | `timeout` | rw | milliseconds, 0 = no deadline |
//!
//! Every other name is forwarded to the backend.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::options::Layout;
use crate::single::Single;

fn layout_string(layouts: &[Layout]) -> String {
    layouts
        .iter()
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_layouts(value: &str, count: usize) -> Result<Vec<Layout>> {
    let layouts = value
        .split(',')
        .map(str::parse)
        .collect::<Result<Vec<Layout>>>()?;
    if layouts.len() != count {
        return Err(Error::invalid(format!(
            "{} layouts given for {count} tensors",
            layouts.len()
        )));
    }
    Ok(layouts)
}

impl Single {
    /// Reads a property. Unknown names are answered by the backend.
    pub fn get_property(&self, name: &str) -> Result<String> {
        let engine = self.engine()?;
        {
            let slots = engine.lock();
            let value = match name {
                "input" => Some(slots.input_info.dimension_string()),
                "inputtype" => Some(slots.input_info.type_string()),
                "inputname" => Some(slots.input_info.name_string()),
                "inputlayout" => Some(layout_string(&slots.input_layout)),
                "output" => Some(slots.output_info.dimension_string()),
                "outputtype" => Some(slots.output_info.type_string()),
                "outputname" => Some(slots.output_info.name_string()),
                "outputlayout" => Some(layout_string(&slots.output_layout)),
                "timeout" => Some(slots.timeout.as_millis().to_string()),
                _ => None,
            };
            if let Some(value) = value {
                return Ok(value);
            }
        }
        engine.with_idle_backend(|_, backend| backend.get_property(name))
    }

    /// Writes a property. Setting `input` or `inputtype` renegotiates the
    /// model like [`Single::set_input_info`]. Unknown names are forwarded to
    /// the backend.
    pub fn set_property(&self, name: &str, value: &str) -> Result<()> {
        let engine = self.engine()?;
        match name {
            "input" | "inputtype" => {
                let mut info = engine.lock().input_info.clone();
                if name == "input" {
                    info.parse_dimensions(value)?;
                } else {
                    info.parse_types(value)?;
                }
                engine.set_input_info(&info)?;
                Ok(())
            }
            "output" | "outputtype" => Err(Error::invalid(format!(
                "property {name:?} is read-only; it follows the input"
            ))),
            "inputname" | "outputname" | "inputlayout" | "outputlayout" => {
                let mut slots = engine.lock();
                slots.ensure_idle()?;
                match name {
                    "inputname" => slots.input_info.parse_names(value)?,
                    "outputname" => slots.output_info.parse_names(value)?,
                    "inputlayout" => {
                        slots.input_layout = parse_layouts(value, slots.input_info.count())?;
                    }
                    _ => {
                        slots.output_layout = parse_layouts(value, slots.output_info.count())?;
                    }
                }
                Ok(())
            }
            "timeout" => {
                let ms = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| Error::invalid(format!("timeout {value:?}: {e}")))?;
                self.set_timeout(Duration::from_millis(ms))
            }
            _ => engine.with_idle_backend(|_, backend| backend.set_property(name, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts() {
        assert_eq!(
            parse_layouts("nchw,any", 2).unwrap(),
            vec![Layout::Nchw, Layout::Any]
        );
        assert!(parse_layouts("nchw", 2).is_err());
        assert!(parse_layouts("chw", 1).is_err());
        assert_eq!(layout_string(&[Layout::Nhwc, Layout::Any]), "nhwc,any");
    }
}
