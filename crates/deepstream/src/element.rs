//! Element helpers shared by the DeepStream wrappers and the pipeline
//! builder.
//!
//! DeepStream element properties change types and names between releases
//! (`live-source` was an int before it was a boolean, `smart-rec-container`
//! only exists on newer `nvurisrcbin`), so values are converted to whatever
//! type the element declares instead of trusting the caller.

use anyhow::{anyhow, bail, Context};
use gst::glib;
use gst::prelude::*;
use log::*;

pub fn make(factory: &str, name: &str) -> anyhow::Result<gst::Element> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .with_context(|| format!("failed to create element '{name}' ({factory})"))
}

pub fn has_property(element: &impl IsA<gst::Object>, name: &str) -> bool {
    element.find_property(name).is_some()
}

fn converted(
    element: &impl IsA<gst::Object>,
    name: &str,
    value: &glib::Value,
) -> anyhow::Result<glib::Value> {
    let element_name = element.as_ref().name();
    let pspec = element
        .find_property(name)
        .ok_or_else(|| anyhow!("{element_name} has no property '{name}'"))?;

    if !pspec.flags().contains(glib::ParamFlags::WRITABLE) {
        bail!("property '{name}' of {element_name} is not writable");
    }

    if value.type_() == pspec.value_type() {
        return Ok(value.clone());
    }

    value.transform_with_type(pspec.value_type()).map_err(|_| {
        anyhow!(
            "cannot convert {} to {} for property '{name}' of {element_name}",
            value.type_(),
            pspec.value_type()
        )
    })
}

/// Sets a property that must exist.
pub fn set_required(
    element: &impl IsA<gst::Object>,
    name: &str,
    value: impl ToValue,
) -> anyhow::Result<()> {
    let value = converted(element, name, &value.to_value())?;
    element.set_property_from_value(name, &value);
    Ok(())
}

/// Sets a property if the element has it. Returns whether it was set.
pub fn set_optional(element: &impl IsA<gst::Object>, name: &str, value: impl ToValue) -> bool {
    match set_required(element, name, value) {
        Ok(()) => true,
        Err(err) => {
            debug!("skipping property: {err:#}");
            false
        }
    }
}

/// Sets an enum (or any deserializable) property from its string form, e.g.
/// `leaky=downstream`, if the element has it.
pub fn set_optional_from_str(element: &impl IsA<gst::Object>, name: &str, value: &str) -> bool {
    if !has_property(element, name) {
        debug!(
            "skipping property: {} has no property '{name}'",
            element.as_ref().name()
        );
        return false;
    }

    element.as_ref().set_property_from_str(name, value);
    true
}

/// Number of arguments an action signal takes, or `None` if the element does
/// not have it.
pub fn signal_arity(element: &impl IsA<gst::Object>, name: &str) -> Option<usize> {
    let id = glib::subclass::SignalId::lookup(name, element.type_())?;
    Some(id.query().n_params() as usize)
}
