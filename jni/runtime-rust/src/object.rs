//! JNI bridge functions for `tether.NativeHandle`.

use crate::BridgeError;
use jni::objects::JClass;
use jni::objects::JObject;
use jni::sys::jboolean;
use jni::sys::jint;
use jni::sys::jlong;
use jni::sys::jstring;
use jni::sys::JNI_FALSE;
use jni::sys::JNI_TRUE;
use jni::JNIEnv;
use tether_runtime::Generation;

/// Value returned to Java alongside a thrown exception.
const NO_SLOT: jint = -1;

fn throw(env: JNIEnv, err: BridgeError) {
    log::debug!("Throwing to Java: {}", err);
    if let Err(jni_err) = env.throw_new(err.java_class(), err.to_string()) {
        log::error!("Failed to throw `{}`: {}", err, jni_err);
    }
}

#[no_mangle]
pub extern "C" fn Java_tether_NativeHandle_attach(
    env: JNIEnv,
    _: JClass,
    generation: jlong,
    object: jlong,
) -> jint {
    match crate::attach(Generation(generation as u64), object) {
        Ok(slot) => slot,
        Err(err) => {
            throw(env, err);
            NO_SLOT
        }
    }
}

#[no_mangle]
pub extern "C" fn Java_tether_NativeHandle_repr(env: JNIEnv, _: JClass, slot: jint) -> jstring {
    let repr = match crate::repr(slot) {
        Ok(repr) => repr,
        Err(err) => {
            throw(env, err);
            return JObject::null().into_inner();
        }
    };
    match env.new_string(repr) {
        Ok(repr) => repr.into_inner(),
        Err(err) => {
            log::error!("Failed to allocate a Java string: {}", err);
            JObject::null().into_inner()
        }
    }
}

#[no_mangle]
pub extern "C" fn Java_tether_NativeHandle_release(_: JNIEnv, _: JClass, slot: jint) {
    crate::release(slot)
}

#[no_mangle]
pub extern "C" fn Java_tether_NativeHandle_alive(_: JNIEnv, _: JClass, slot: jint) -> jboolean {
    if crate::alive(slot) {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}
