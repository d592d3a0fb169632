use serde::Deserialize;
use serde_json::Value;
use std::fmt;

const DISCLAIMER: &str = "Medical disclaimer: this is not a diagnosis. Consult a professional.";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PatientDetails {
    pub name: Option<Value>,
    pub age: Option<Value>,
    pub gender: Option<Value>,
    pub location: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PossibleCondition {
    pub condition: Option<Value>,
    pub confidence_percentage: Option<Value>,
    pub rationale: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Recommendation {
    pub urgency: Option<Value>,
    pub action: Option<Value>,
    pub next_steps: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TriageReport {
    pub patient_details: PatientDetails,
    pub possible_conditions: Vec<PossibleCondition>,
    pub final_recommendation: Recommendation,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Doctor {
    pub rank: Option<Value>,
    pub doctor_name: Option<Value>,
    pub clinic_name: Option<Value>,
    pub address: Option<Value>,
    pub distance_km: Option<Value>,
    pub rating: Option<Value>,
    pub review_count: Option<Value>,
    pub google_maps_link: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DoctorSearch {
    pub total_doctors_found: Option<Value>,
    pub mapped_specialty: Option<Value>,
    pub search_location: Option<Value>,
    pub top_doctors: Vec<Doctor>,
}

/// A structured agent reply worth rendering as a card instead of raw text.
#[derive(Debug, Clone)]
pub enum Card {
    Triage(TriageReport),
    Doctors(DoctorSearch),
}

impl Card {
    /// Looks for a triage or doctor-search JSON object embedded in `text`.
    pub fn detect(text: &str) -> Option<Self> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end < start {
            return None;
        }

        let data: Value = serde_json::from_str(&text[start..=end]).ok()?;
        let object = data.as_object()?;

        if object.contains_key("patient_details") && object.contains_key("possible_conditions") {
            serde_json::from_value(data).ok().map(Card::Triage)
        } else if object.contains_key("top_doctors") && object.contains_key("mapped_specialty") {
            serde_json::from_value(data).ok().map(Card::Doctors)
        } else {
            None
        }
    }
}

fn show(value: &Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => "unknown".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl fmt::Display for TriageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patient = &self.patient_details;
        let rec = &self.final_recommendation;

        writeln!(f, "== Triage Report ==")?;
        writeln!(
            f,
            "Patient: {} ({}/{})",
            show(&patient.name),
            show(&patient.age),
            show(&patient.gender)
        )?;
        writeln!(f, "Location: {}", show(&patient.location))?;
        writeln!(f, "Urgency: {}", show(&rec.urgency))?;
        writeln!(f, "Action: {}", show(&rec.action))?;

        writeln!(f, "\nTop possible conditions:")?;
        for cond in &self.possible_conditions {
            writeln!(
                f,
                "  - {} ({}): {}",
                show(&cond.condition),
                show(&cond.confidence_percentage),
                show(&cond.rationale)
            )?;
        }

        writeln!(f, "\nNext steps: {}", show(&rec.next_steps))?;
        write!(f, "{}", DISCLAIMER)
    }
}

impl fmt::Display for DoctorSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Found {} doctors for {} in {}",
            show(&self.total_doctors_found),
            show(&self.mapped_specialty),
            show(&self.search_location)
        )?;

        for doc in &self.top_doctors {
            write!(
                f,
                "\n\n{}. {}\n   {}\n   {} ({} km)\n   Rating {} ({} reviews)",
                show(&doc.rank),
                show(&doc.doctor_name),
                show(&doc.clinic_name),
                show(&doc.address),
                show(&doc.distance_km),
                show(&doc.rating),
                show(&doc.review_count)
            )?;
            if let Some(link) = doc
                .google_maps_link
                .as_ref()
                .and_then(Value::as_str)
                .filter(|l| !l.is_empty())
            {
                write!(f, "\n   Map: {}", link)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Card::Triage(report) => fmt::Display::fmt(report, f),
            Card::Doctors(search) => fmt::Display::fmt(search, f),
        }
    }
}
