//! 临床特征定义与校验
//!
//! 十二项临床测量值的名称、类型、取值范围以及向量顺序都由 [`FIELD_SPECS`]
//! 一张表决定。缩放器按该顺序拟合，任何调整顺序的改动都会让预测静默出错。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FieldError, IvfError, Result};

/// 特征数量
pub const FEATURE_COUNT: usize = 12;

/// 字段类型
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Integer,
    /// 定点小数，对应 NUMERIC(max_digits, decimal_places)
    Decimal {
        max_digits: usize,
        decimal_places: usize,
    },
}

/// 单个字段的约束
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub min: f64,
    pub max: f64,
}

const DECIMAL_4_2: FieldKind = FieldKind::Decimal {
    max_digits: 4,
    decimal_places: 2,
};

const fn integer(name: &'static str, min: f64, max: f64) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Integer,
        min,
        max,
    }
}

const fn decimal(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: DECIMAL_4_2,
        min: 0.0,
        max: 99.99,
    }
}

/// 字段约束表，顺序即缩放器拟合时的特征顺序
pub const FIELD_SPECS: [FieldSpec; FEATURE_COUNT] = [
    integer("female_age", 10.0, 99.0),
    decimal("AMH"),
    decimal("FSH"),
    integer("no_embryos", 0.0, 99.0),
    decimal("endometrial_thickness"),
    decimal("sperm_count"),
    integer("sperm_morphology", 0.0, 100.0),
    integer("follicle_size", 0.0, 99.0),
    integer("retrieved_oocytes", 0.0, 99.0),
    integer("embryo_quality", 0.0, 99.0),
    integer("oocytes_MI", 0.0, 99.0),
    integer("oocytes_MII", 0.0, 99.0),
];

/// 特征名称，按向量顺序排列
pub const FEATURE_ORDER: [&str; FEATURE_COUNT] = [
    FIELD_SPECS[0].name,
    FIELD_SPECS[1].name,
    FIELD_SPECS[2].name,
    FIELD_SPECS[3].name,
    FIELD_SPECS[4].name,
    FIELD_SPECS[5].name,
    FIELD_SPECS[6].name,
    FIELD_SPECS[7].name,
    FIELD_SPECS[8].name,
    FIELD_SPECS[9].name,
    FIELD_SPECS[10].name,
    FIELD_SPECS[11].name,
];

/// 一次预测的十二项临床测量值（未缩放的原始输入）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClinicalFeatures {
    pub female_age: i32,
    #[serde(rename = "AMH")]
    pub amh: f64,
    #[serde(rename = "FSH")]
    pub fsh: f64,
    pub no_embryos: i32,
    pub endometrial_thickness: f64,
    pub sperm_count: f64,
    pub sperm_morphology: i32,
    pub follicle_size: i32,
    pub retrieved_oocytes: i32,
    pub embryo_quality: i32,
    #[serde(rename = "oocytes_MI")]
    pub oocytes_mi: i32,
    #[serde(rename = "oocytes_MII")]
    pub oocytes_mii: i32,
}

impl ClinicalFeatures {
    /// 从请求体解析并校验，一次性报告所有不合格字段
    ///
    /// 未知字段以及 `result`、`probability` 等只读字段会被忽略。
    pub fn from_json(body: &Value) -> Result<Self> {
        let object = body.as_object().ok_or_else(|| {
            IvfError::validation(
                "non_field_errors",
                "Invalid data. Expected an object of clinical measurements.",
            )
        })?;

        let mut values = [0.0_f64; FEATURE_COUNT];
        let mut errors = Vec::new();

        for (slot, spec) in values.iter_mut().zip(FIELD_SPECS.iter()) {
            match object.get(spec.name) {
                None | Some(Value::Null) => {
                    errors.push(FieldError::new(spec.name, "This field is required."))
                }
                Some(raw) => match spec.parse(raw) {
                    Ok(value) => *slot = value,
                    Err(message) => errors.push(FieldError::new(spec.name, message)),
                },
            }
        }

        if !errors.is_empty() {
            return Err(IvfError::Validation(errors));
        }

        Ok(Self::from_vector(&values))
    }

    /// 按 [`FEATURE_ORDER`] 组装特征向量
    pub fn to_vector(&self) -> [f64; FEATURE_COUNT] {
        [
            f64::from(self.female_age),
            self.amh,
            self.fsh,
            f64::from(self.no_embryos),
            self.endometrial_thickness,
            self.sperm_count,
            f64::from(self.sperm_morphology),
            f64::from(self.follicle_size),
            f64::from(self.retrieved_oocytes),
            f64::from(self.embryo_quality),
            f64::from(self.oocytes_mi),
            f64::from(self.oocytes_mii),
        ]
    }

    /// [`to_vector`](Self::to_vector) 的逆操作，整数字段已经过校验
    pub fn from_vector(values: &[f64; FEATURE_COUNT]) -> Self {
        Self {
            female_age: values[0] as i32,
            amh: values[1],
            fsh: values[2],
            no_embryos: values[3] as i32,
            endometrial_thickness: values[4],
            sperm_count: values[5],
            sperm_morphology: values[6] as i32,
            follicle_size: values[7] as i32,
            retrieved_oocytes: values[8] as i32,
            embryo_quality: values[9] as i32,
            oocytes_mi: values[10] as i32,
            oocytes_mii: values[11] as i32,
        }
    }
}

impl FieldSpec {
    fn parse(&self, raw: &Value) -> std::result::Result<f64, String> {
        let value = match self.kind {
            FieldKind::Integer => parse_integer(raw)? as f64,
            FieldKind::Decimal {
                max_digits,
                decimal_places,
            } => parse_decimal(raw, max_digits, decimal_places)?,
        };

        if value < self.min || value > self.max {
            return Err(format!(
                "Ensure this value is between {} and {}.",
                self.min, self.max
            ));
        }

        Ok(value)
    }
}

fn parse_integer(raw: &Value) -> std::result::Result<i64, String> {
    const MESSAGE: &str = "A valid integer is required.";

    let as_float = match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            n.as_f64()
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(i);
            }
            s.parse::<f64>().ok()
        }
        _ => None,
    };

    // 允许 "37.0" 这类整数值的小数写法
    match as_float {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => Ok(f as i64),
        _ => Err(MESSAGE.to_string()),
    }
}

fn parse_decimal(
    raw: &Value,
    max_digits: usize,
    decimal_places: usize,
) -> std::result::Result<f64, String> {
    const MESSAGE: &str = "A valid number is required.";

    let text = match raw {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err(MESSAGE.to_string()),
    };

    let unsigned = text.strip_prefix('-').unwrap_or(&text);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (unsigned, ""),
    };

    if whole.is_empty() && fraction.is_empty()
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(MESSAGE.to_string());
    }

    let whole_digits = whole.trim_start_matches('0').len();
    let fraction_digits = fraction.trim_end_matches('0').len();

    if fraction_digits > decimal_places {
        return Err(format!(
            "Ensure that there are no more than {} decimal places.",
            decimal_places
        ));
    }
    if whole_digits > max_digits - decimal_places {
        return Err(format!(
            "Ensure that there are no more than {} digits before the decimal point.",
            max_digits - decimal_places
        ));
    }
    if whole_digits + fraction_digits > max_digits {
        return Err(format!(
            "Ensure that there are no more than {} digits in total.",
            max_digits
        ));
    }

    text.parse::<f64>().map_err(|_| MESSAGE.to_string())
}
