use std::fmt;

use crate::abstract_domain::SetDomain;
use crate::prelude::*;

const LEAF_NAME_MARKER: &str = "%programmatic_leaf_name%";
const VIA_TYPE_OF_MARKER: &str = "%via_type_of%";

/// A naming template for cross-repository taint exchange.
///
/// Models that describe endpoints of flows continuing in another repository
/// declare templated canonical names. When such a model materializes at a
/// call site, the template placeholders are substituted with the callee
/// signature and the via-type-of feature of the call, producing the
/// instantiated name under which the flow is exported.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum CanonicalName {
    /// A template with `%programmatic_leaf_name%` and `%via_type_of%`
    /// placeholders, as declared by the model author.
    Template { value: String },
    /// A template with all placeholders substituted.
    Instantiated { value: String },
}

impl CanonicalName {
    pub fn template(value: impl Into<String>) -> Self {
        CanonicalName::Template {
            value: value.into(),
        }
    }

    pub fn instantiated(value: impl Into<String>) -> Self {
        CanonicalName::Instantiated {
            value: value.into(),
        }
    }

    pub fn template_value(&self) -> Option<&str> {
        match self {
            CanonicalName::Template { value } => Some(value),
            CanonicalName::Instantiated { .. } => None,
        }
    }

    pub fn instantiated_value(&self) -> Option<&str> {
        match self {
            CanonicalName::Template { .. } => None,
            CanonicalName::Instantiated { value } => Some(value),
        }
    }

    pub fn is_via_type_of_template(&self) -> bool {
        self.template_value()
            .is_some_and(|value| value.contains(VIA_TYPE_OF_MARKER))
    }

    /// Substitutes the template placeholders for the given call site.
    ///
    /// Returns `None` if the template requires a via-type-of feature but the
    /// call site did not produce exactly one.
    pub fn instantiate(
        &self,
        callee_name: &str,
        via_type_of_features: &[String],
    ) -> Option<CanonicalName> {
        let template = match self.template_value() {
            Some(value) => value,
            None => return None,
        };
        let mut name = template.replace(LEAF_NAME_MARKER, callee_name);

        if template.contains(VIA_TYPE_OF_MARKER) {
            match via_type_of_features {
                [feature] => name = name.replace(VIA_TYPE_OF_MARKER, feature),
                [] => {
                    log::warn!(
                        "Could not instantiate canonical name template `{template}`. \
                         Via-type-of feature not available."
                    );
                    return None;
                }
                _ => {
                    log::warn!(
                        "Could not instantiate canonical name template `{template}`. \
                         Unable to disambiguate between {} via-type-of features.",
                        via_type_of_features.len(),
                    );
                    return None;
                }
            }
        }

        Some(CanonicalName::instantiated(name))
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CanonicalName::Template { value } => write!(formatter, "template={value}"),
            CanonicalName::Instantiated { value } => write!(formatter, "instantiated={value}"),
        }
    }
}

/// A set of canonical names. All elements are either templates or
/// instantiations, never a mix.
pub type CanonicalNameSet = SetDomain<CanonicalName>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiate_substitutes_the_callee_name() {
        let template = CanonicalName::template("Lcom/example;.%programmatic_leaf_name%");
        assert_eq!(
            template.instantiate("box:(I)V", &[]),
            Some(CanonicalName::instantiated("Lcom/example;.box:(I)V")),
        );
    }

    #[test]
    fn instantiate_requires_an_unambiguous_via_type_of() {
        let template = CanonicalName::template("%via_type_of%__%programmatic_leaf_name%");
        assert!(template.is_via_type_of_template());
        assert_eq!(template.instantiate("box:(I)V", &[]), None);
        assert_eq!(
            template.instantiate("box:(I)V", &["via-type:Intent".to_string()]),
            Some(CanonicalName::instantiated("via-type:Intent__box:(I)V")),
        );
        assert_eq!(
            template.instantiate(
                "box:(I)V",
                &["via-type:Intent".to_string(), "via-type:Uri".to_string()],
            ),
            None,
        );
    }

    #[test]
    fn instantiated_names_cannot_be_instantiated_again() {
        let name = CanonicalName::instantiated("done");
        assert_eq!(name.instantiate("box:(I)V", &[]), None);
    }
}
