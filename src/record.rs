//! # Clinical Record Schema and Validation
//!
//! This module is the only entry point for request payloads. It owns the fixed
//! set of fifteen clinical measurements, their wire names, their declared types,
//! and the byte-exact feature names the trained artifacts were fit on.
//!
//! - Strict Schema: every field is required. There are no optional fields and no
//!   defaults; unknown keys are ignored.
//! - Field-Level Errors: validation stops at the first offending field (in
//!   declaration order) and reports it by wire name, so the boundary can answer
//!   with a precise client error.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// The declared type of a clinical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A real-valued measurement (age, weight, hormone levels, ...).
    Real,
    /// An integer-coded category, e.g. the cycle regularity code.
    Integer,
    /// A yes/no flag encoded as 0 or 1.
    Flag,
}

impl FieldKind {
    fn describe(self) -> &'static str {
        match self {
            FieldKind::Real => "a number",
            FieldKind::Integer => "an integer",
            FieldKind::Flag => "0 or 1",
        }
    }
}

/// One of the fifteen measurements that make up a [`ClinicalRecord`].
///
/// The discriminant order is the declaration order used for validation and for
/// the in-memory layout of a record. It is *not* the model's feature order; that
/// comes from the externally supplied feature list (see `features`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClinicalField {
    AgeYears,
    WeightKg,
    Hemoglobin,
    CycleRegularity,
    CycleLengthDays,
    BetaHcg,
    Amh,
    WeightGain,
    HairGrowth,
    SkinDarkening,
    Pimples,
    FastFood,
    FollicleCountLeft,
    FollicleCountRight,
    EndometriumMm,
}

impl ClinicalField {
    pub const COUNT: usize = 15;

    pub const ALL: [ClinicalField; Self::COUNT] = [
        ClinicalField::AgeYears,
        ClinicalField::WeightKg,
        ClinicalField::Hemoglobin,
        ClinicalField::CycleRegularity,
        ClinicalField::CycleLengthDays,
        ClinicalField::BetaHcg,
        ClinicalField::Amh,
        ClinicalField::WeightGain,
        ClinicalField::HairGrowth,
        ClinicalField::SkinDarkening,
        ClinicalField::Pimples,
        ClinicalField::FastFood,
        ClinicalField::FollicleCountLeft,
        ClinicalField::FollicleCountRight,
        ClinicalField::EndometriumMm,
    ];

    /// The JSON key a client sends for this field.
    pub fn wire_name(self) -> &'static str {
        match self {
            ClinicalField::AgeYears => "Age_yrs",
            ClinicalField::WeightKg => "Weight_Kg",
            ClinicalField::Hemoglobin => "Hb_g_dl",
            ClinicalField::CycleRegularity => "Cycle_R_I",
            ClinicalField::CycleLengthDays => "Cycle_length_days",
            ClinicalField::BetaHcg => "I_beta_HCG_mIU_mL",
            ClinicalField::Amh => "AMH_ng_mL",
            ClinicalField::WeightGain => "Weight_gain_YN",
            ClinicalField::HairGrowth => "hair_growth_YN",
            ClinicalField::SkinDarkening => "Skin_darkening_YN",
            ClinicalField::Pimples => "Pimples_YN",
            ClinicalField::FastFood => "Fast_food_YN",
            ClinicalField::FollicleCountLeft => "Follicle_No_L",
            ClinicalField::FollicleCountRight => "Follicle_No_R",
            ClinicalField::EndometriumMm => "Endometrium_mm",
        }
    }

    /// The feature name the trained artifacts use for this field.
    ///
    /// These strings were fixed when the model was fit (including the odd
    /// spacing in the beta-HCG name) and must be reproduced byte for byte.
    pub fn feature_name(self) -> &'static str {
        match self {
            ClinicalField::AgeYears => "Age (yrs)",
            ClinicalField::WeightKg => "Weight (Kg)",
            ClinicalField::Hemoglobin => "Hb(g/dl)",
            ClinicalField::CycleRegularity => "Cycle(R/I)",
            ClinicalField::CycleLengthDays => "Cycle length(days)",
            ClinicalField::BetaHcg => "I   beta-HCG(mIU/mL)",
            ClinicalField::Amh => "AMH(ng/mL)",
            ClinicalField::WeightGain => "Weight gain(Y/N)",
            ClinicalField::HairGrowth => "hair growth(Y/N)",
            ClinicalField::SkinDarkening => "Skin darkening (Y/N)",
            ClinicalField::Pimples => "Pimples(Y/N)",
            ClinicalField::FastFood => "Fast food (Y/N)",
            ClinicalField::FollicleCountLeft => "Follicle No. (L)",
            ClinicalField::FollicleCountRight => "Follicle No. (R)",
            ClinicalField::EndometriumMm => "Endometrium (mm)",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            ClinicalField::CycleRegularity => FieldKind::Integer,
            ClinicalField::WeightGain
            | ClinicalField::HairGrowth
            | ClinicalField::SkinDarkening
            | ClinicalField::Pimples
            | ClinicalField::FastFood => FieldKind::Flag,
            _ => FieldKind::Real,
        }
    }

    /// Reverse lookup from a model feature name.
    pub fn from_feature_name(name: &str) -> Option<ClinicalField> {
        Self::ALL.into_iter().find(|f| f.feature_name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ClinicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A client-caused problem with the request payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Request body is not valid JSON: {0}")]
    Malformed(String),
    #[error("Request body must be a JSON object")]
    NotAnObject,
    #[error("Missing feature: '{0}'")]
    MissingField(&'static str),
    #[error("Invalid value for '{field}': expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

impl ValidationError {
    /// The wire name of the offending field, when the error is tied to one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::MissingField(field) => Some(*field),
            ValidationError::WrongType { field, .. } => Some(*field),
            _ => None,
        }
    }
}

/// A fully validated set of measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalRecord {
    values: [f64; ClinicalField::COUNT],
}

impl ClinicalRecord {
    /// Parses raw request bytes and validates them.
    pub fn from_slice(body: &[u8]) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_json(&value)
    }

    /// Validates an already-parsed JSON payload.
    pub fn from_json(payload: &Value) -> Result<Self, ValidationError> {
        let object = payload.as_object().ok_or(ValidationError::NotAnObject)?;

        let mut values = [0.0; ClinicalField::COUNT];
        for field in ClinicalField::ALL {
            values[field.index()] = read_field(object, field)?;
        }
        Ok(Self { values })
    }

    /// Builds a record from values given in [`ClinicalField::ALL`] order.
    /// The values go through the same type checks as a JSON payload.
    #[cfg(test)]
    pub fn from_values(values: [f64; ClinicalField::COUNT]) -> Result<Self, ValidationError> {
        for field in ClinicalField::ALL {
            check_kind(field, values[field.index()])?;
        }
        Ok(Self { values })
    }

    pub fn value(&self, field: ClinicalField) -> f64 {
        self.values[field.index()]
    }
}

fn read_field(object: &Map<String, Value>, field: ClinicalField) -> Result<f64, ValidationError> {
    let raw = match object.get(field.wire_name()) {
        None | Some(Value::Null) => return Err(ValidationError::MissingField(field.wire_name())),
        Some(raw) => raw,
    };

    let wrong_type = || ValidationError::WrongType {
        field: field.wire_name(),
        expected: field.kind().describe(),
    };

    // Numeric strings are coerced, as lax JSON clients send them.
    let number = match raw {
        Value::String(text) => text.trim().parse::<f64>().ok(),
        other => other.as_f64(),
    }
    .ok_or_else(wrong_type)?;
    check_kind(field, number)?;
    Ok(number)
}

fn check_kind(field: ClinicalField, value: f64) -> Result<(), ValidationError> {
    let ok = value.is_finite()
        && match field.kind() {
            FieldKind::Real => true,
            FieldKind::Integer => value.fract() == 0.0,
            FieldKind::Flag => value == 0.0 || value == 1.0,
        };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::WrongType {
            field: field.wire_name(),
            expected: field.kind().describe(),
        })
    }
}
