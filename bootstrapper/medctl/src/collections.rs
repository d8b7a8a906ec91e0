use access_policy::defaults::ADMISSIONS;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSpec {
    pub name: String,
    /// Document validator, usually a `$jsonSchema` expression.
    pub validator: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub name: String,
    /// Ordered (field path, direction) pairs.
    pub keys: Vec<(String, i32)>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionPlan {
    pub collection: CollectionSpec,
    pub indexes: Vec<IndexSpec>,
}

/// The `admissions` collection: one document per hospital stay, validated
/// with `$jsonSchema`, one stay per patient per admission date.
pub fn admissions() -> CollectionPlan {
    let validator = json!({
        "$jsonSchema": {
            "bsonType": "object",
            "required": ["patient", "admission", "medical"],
            "properties": {
                "patient": {
                    "bsonType": "object",
                    "required": ["name", "age", "gender", "blood_type", "insurance_provider"],
                    "properties": {
                        "name": { "bsonType": "string" },
                        "age": { "bsonType": "int" },
                        "gender": { "enum": ["Male", "Female"] },
                        "blood_type": {
                            "enum": ["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"]
                        },
                        "insurance_provider": {
                            "enum": ["Aetna", "Blue Cross", "Cigna", "Medicare", "UnitedHealthcare"]
                        }
                    }
                },
                "admission": {
                    "bsonType": "object",
                    "required": ["date", "type"],
                    "properties": {
                        "date": { "bsonType": "date" },
                        "type": { "enum": ["Elective", "Emergency", "Urgent"] },
                        "room_number": { "bsonType": ["int", "null"] },
                        "billing_amount": { "bsonType": ["double", "null"] },
                        "discharge_date": { "bsonType": ["date", "null"] },
                        "doctor": { "bsonType": "string" },
                        "hospital": { "bsonType": "string" }
                    }
                },
                "medical": {
                    "bsonType": "object",
                    "required": ["condition", "medication", "test_results"],
                    "properties": {
                        "condition": {
                            "enum": ["Arthritis", "Asthma", "Cancer", "Diabetes", "Hypertension", "Obesity"]
                        },
                        "medication": {
                            "enum": ["Aspirin", "Ibuprofen", "Lipitor", "Paracetamol", "Penicillin"]
                        },
                        "test_results": { "enum": ["Abnormal", "Inconclusive", "Normal"] }
                    }
                }
            }
        }
    });

    let keys = [
        "patient.name",
        "patient.age",
        "patient.gender",
        "patient.blood_type",
        "admission.date",
    ]
    .into_iter()
    .map(|k| (k.to_string(), 1))
    .collect();

    CollectionPlan {
        collection: CollectionSpec {
            name: ADMISSIONS.to_string(),
            validator,
        },
        indexes: vec![IndexSpec {
            name: "unique_patient".to_string(),
            keys,
            unique: true,
        }],
    }
}
