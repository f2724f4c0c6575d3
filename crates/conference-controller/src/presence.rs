//! Conference state documents (RFC 4575 `conference-info`).
//!
//! Rendered from a [`RoomSnapshot`] by the leg of each subscribed participant.
//! `user-count` is always derived from the rendered `<user>` elements.

use crate::actors::messages::{Participant, RoomSnapshot};
use crate::errors::CcError;

use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::Writer;
use std::io;

/// Namespace of conference-info documents.
pub const CONFERENCE_INFO_NS: &str = "urn:ietf:params:xml:ns:conference-info";

/// Render a full conference-info document for `snapshot`.
///
/// # Errors
///
/// `CcError::Internal` if the document cannot be serialized.
pub fn render_conference_info(snapshot: &RoomSnapshot) -> Result<String, CcError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_document(&mut writer, snapshot)
        .map_err(|e| CcError::Internal(format!("conference-info rendering failed: {e}")))?;
    String::from_utf8(writer.into_inner())
        .map_err(|e| CcError::Internal(format!("conference-info is not UTF-8: {e}")))
}

fn write_document(writer: &mut Writer<Vec<u8>>, snapshot: &RoomSnapshot) -> io::Result<()> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let version = snapshot.version.to_string();
    let user_count = snapshot.participants.len().to_string();
    writer
        .create_element("conference-info")
        .with_attribute(("xmlns", CONFERENCE_INFO_NS))
        .with_attribute(("entity", snapshot.conference_name.as_str()))
        .with_attribute(("state", "full"))
        .with_attribute(("version", version.as_str()))
        .write_inner_content(|w| {
            w.create_element("conference-description")
                .write_inner_content(|w| {
                    w.create_element("subject")
                        .write_text_content(BytesText::new(&snapshot.subject))?;
                    Ok(())
                })?;
            w.create_element("conference-state")
                .write_inner_content(|w| {
                    w.create_element("user-count")
                        .write_text_content(BytesText::new(&user_count))?;
                    Ok(())
                })?;
            w.create_element("users").write_inner_content(|w| {
                for participant in &snapshot.participants {
                    write_user(w, participant)?;
                }
                Ok(())
            })?;
            Ok(())
        })?;
    Ok(())
}

fn write_user(writer: &mut Writer<Vec<u8>>, participant: &Participant) -> io::Result<()> {
    let compose_state = participant.compose_state.to_string();
    writer
        .create_element("user")
        .with_attribute(("entity", participant.entity.as_str()))
        .with_attribute(("state", "full"))
        .write_inner_content(|w| {
            if let Some(display) = &participant.display_name {
                w.create_element("display-text")
                    .write_text_content(BytesText::new(display))?;
            }
            if !participant.nickname.is_empty() {
                w.create_element("nickname")
                    .write_text_content(BytesText::new(&participant.nickname))?;
            }
            w.create_element("isComposing")
                .with_attribute(("state", compose_state.as_str()))
                .write_empty()?;
            Ok(())
        })?;
    Ok(())
}
