//! Session description helpers.
//!
//! Negotiation itself belongs to the media transport; the controller only
//! needs to recognise chat offers and to advertise chatroom capabilities in
//! the local description it answers with.

use std::io::Cursor;

use sdp::description::common::Attribute;
use sdp::description::session::SessionDescription;

use crate::errors::CcError;

/// Content types accepted by chat legs.
pub const ACCEPT_TYPES: &str = "message/cpim text/plain application/im-iscomposing+xml";

/// Chatroom capabilities advertised to participants.
pub const CHATROOM_CAPABILITIES: &str = "nickname";

const MESSAGE_MEDIA: &str = "message";
const ACCEPT_TYPES_ATTR: &str = "accept-types";
const CHATROOM_ATTR: &str = "chatroom";

fn parse(body: &str) -> Result<SessionDescription, sdp::Error> {
    SessionDescription::unmarshal(&mut Cursor::new(body.as_bytes()))
}

/// True if the offer parses and contains a `message` media section.
#[must_use]
pub fn is_chat_offer(body: &str) -> bool {
    parse(body).is_ok_and(|description| {
        description
            .media_descriptions
            .iter()
            .any(|media| media.media_name.media == MESSAGE_MEDIA)
    })
}

/// Rewrite the `message` media sections of a local description so they
/// advertise the accepted content types and chatroom capabilities.
///
/// Any `accept-types` the transport put there is replaced; an existing
/// `chatroom` attribute is kept. Other sections pass through untouched.
///
/// # Errors
///
/// `CcError::Collaborator` when the transport's description does not parse.
pub fn indicate_chatroom(local: &str) -> Result<String, CcError> {
    let mut description = parse(local)
        .map_err(|e| CcError::Collaborator(format!("unparseable local description: {e}")))?;

    for media in description
        .media_descriptions
        .iter_mut()
        .filter(|media| media.media_name.media == MESSAGE_MEDIA)
    {
        media.attributes.retain(|attr| attr.key != ACCEPT_TYPES_ATTR);
        media.attributes.push(Attribute {
            key: ACCEPT_TYPES_ATTR.to_string(),
            value: Some(ACCEPT_TYPES.to_string()),
        });
        if !media.attributes.iter().any(|attr| attr.key == CHATROOM_ATTR) {
            media.attributes.push(Attribute {
                key: CHATROOM_ATTR.to_string(),
                value: Some(CHATROOM_CAPABILITIES.to_string()),
            });
        }
    }

    Ok(description.marshal())
}
